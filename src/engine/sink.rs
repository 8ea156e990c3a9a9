//! Storage boundary. A sink receives one complete [`GameBatch`] at a time
//! and must persist it all-or-nothing.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::engine::aggregator::GameBatch;
use crate::engine::error::SinkError;

pub trait SnapshotSink {
    fn write_game(&mut self, batch: &GameBatch) -> Result<(), SinkError>;
}

/// Keeps batches in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<GameBatch>,
}

impl SnapshotSink for MemorySink {
    fn write_game(&mut self, batch: &GameBatch) -> Result<(), SinkError> {
        self.batches.push(batch.clone());
        Ok(())
    }
}

/// Writes `game_<id>.json` per game. The file appears only once fully
/// written (temp file in the same directory, then rename).
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, game_id: u64) -> PathBuf {
        self.dir.join(format!("game_{game_id}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotSink for JsonDirSink {
    fn write_game(&mut self, batch: &GameBatch) -> Result<(), SinkError> {
        let target = self.path_for(batch.game_id);
        let temp = self.dir.join(format!(".game_{}.json.tmp", batch.game_id));
        let written = write_temp(&temp, batch).and_then(|()| fs::rename(&temp, &target).map_err(SinkError::from));
        if let Err(err) = written {
            match fs::remove_file(&temp) {
                Err(cleanup) if cleanup.kind() != io::ErrorKind::NotFound => {
                    tracing::warn!(path = %temp.display(), error = %cleanup, "could not remove partial batch file");
                }
                _ => {}
            }
            return Err(err);
        }
        tracing::debug!(game_id = batch.game_id, path = %target.display(), "wrote game batch");
        Ok(())
    }
}

fn write_temp(path: &Path, batch: &GameBatch) -> Result<(), SinkError> {
    let mut file = fs::File::create(path)?;
    serde_json::to_writer_pretty(&mut file, batch)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}
