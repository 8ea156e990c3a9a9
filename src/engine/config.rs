//! Runtime configuration, loaded from TOML. Command-line flags override
//! whatever the file sets.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::error::ConfigError;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Replay worker threads; 0 uses every available core.
    pub workers: usize,
    /// Compare each replayed turn with the feed's standings.
    pub verify_standings: bool,
    pub output_dir: PathBuf,
    /// Directory with `maps/` and `templates/` for topology not embedded
    /// in the feeds.
    pub topology_dir: Option<PathBuf>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            verify_standings: false,
            output_dir: PathBuf::from("replays"),
            topology_dir: None,
        }
    }
}

impl ReplayConfig {
    /// Worker count with 0 resolved to the number of cores.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }
}

/// Load the configuration from a TOML file at the given path.
pub fn load_config(path: &Path) -> Result<ReplayConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Try well-known paths, falling back to defaults when none loads.
pub fn load_default_config() -> ReplayConfig {
    let candidates = [
        "ladder_replay.toml",
        "../ladder_replay.toml",
        "/etc/ladder-replay/ladder_replay.toml",
    ];
    for path in &candidates {
        let p = Path::new(path);
        if p.exists() {
            match load_config(p) {
                Ok(config) => {
                    tracing::info!(path = %p.display(), "loaded replay config");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "failed to load replay config");
                }
            }
        }
    }
    tracing::info!("no ladder_replay.toml found, using built-in defaults");
    ReplayConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladder_replay.toml");
        std::fs::write(&path, "workers = 3\nverify_standings = true\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.workers, 3);
        assert!(config.verify_standings);
        assert_eq!(config.output_dir, PathBuf::from("replays"));
        assert_eq!(config.topology_dir, None);
        assert_eq!(config.effective_workers(), 3);
    }

    #[test]
    fn test_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(load_config(&missing), Err(ConfigError::Read { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "workers = \"many\"\n").unwrap();
        let err = load_config(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_zero_workers_means_all_cores() {
        assert!(ReplayConfig::default().effective_workers() >= 1);
    }
}
