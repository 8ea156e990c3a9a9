//! Replay game feeds and write per-turn player snapshots.
//!
//! Usage:
//!   ladder-replay --out replays/ --verify feeds/*.json

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ladder_replay::engine::config::{load_config, load_default_config};
use ladder_replay::engine::pool::replay_feeds;
use ladder_replay::engine::sink::JsonDirSink;
use ladder_replay::feed::GameFeed;
use ladder_replay::topology::{JsonDirSource, TopologyCache};

#[derive(Parser)]
#[command(name = "ladder-replay", about = "Replay resolved game feeds into per-turn player snapshots")]
struct Cli {
    /// Game feed JSON files
    #[arg(required = true)]
    feeds: Vec<PathBuf>,

    /// Path to ladder_replay.toml (default: auto-discover)
    #[arg(long, env = "LADDER_REPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Replay worker threads (0 = all cores)
    #[arg(long, env = "LADDER_REPLAY_WORKERS")]
    workers: Option<usize>,

    /// Output directory for game_<id>.json batches
    #[arg(long, env = "LADDER_REPLAY_OUT")]
    out: Option<PathBuf>,

    /// Directory with maps/ and templates/ for feeds without embedded topology
    #[arg(long, env = "LADDER_REPLAY_TOPOLOGY")]
    topology: Option<PathBuf>,

    /// Compare every replayed turn against the feed's standings
    #[arg(long)]
    verify: bool,
}

fn read_feed(path: &Path) -> Result<GameFeed, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => load_default_config(),
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(out) = cli.out {
        config.output_dir = out;
    }
    if cli.topology.is_some() {
        config.topology_dir = cli.topology;
    }
    config.verify_standings |= cli.verify;

    let mut feeds = Vec::with_capacity(cli.feeds.len());
    for path in &cli.feeds {
        match read_feed(path) {
            Ok(feed) => feeds.push(feed),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "skipping unreadable feed"),
        }
    }

    // Single writer: warm the cache for every feed before any replay starts.
    let mut cache = match config.topology_dir.as_ref() {
        Some(dir) => TopologyCache::with_source(Box::new(JsonDirSource::new(dir))),
        None => TopologyCache::new(),
    };
    feeds.retain(|feed| match cache.warm_from_feed(feed) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(game_id = feed.id, error = %e, "no topology for game, skipping");
            false
        }
    });
    let (maps, templates) = cache.counts();
    tracing::info!(games = feeds.len(), maps, templates, workers = config.effective_workers(), "starting replay");
    let topology = cache.freeze();

    let mut sink = JsonDirSink::new(&config.output_dir)?;
    let reported = AtomicUsize::new(0);
    let progress_cb = |done: usize, total: usize| {
        let step = (total / 10).max(1);
        if done % step == 0 || done == total {
            let last = reported.fetch_max(done, Ordering::Relaxed);
            if last < done {
                tracing::info!(done, total, "replay progress");
            }
        }
    };

    let summary = replay_feeds(
        &feeds,
        &topology,
        config.workers,
        config.verify_standings,
        &mut sink,
        Some(&progress_cb),
    );
    println!("{}", summary.summary());

    if !summary.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
