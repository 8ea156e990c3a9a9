//! Batch runner: replays many games in parallel and flushes each finished
//! game to a sink.
//!
//! Games share nothing but the frozen topology, so each one is an
//! independent rayon task. Results are written in input order, one
//! complete batch per game.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::engine::aggregator::{emit_game, GameBatch};
use crate::engine::error::GameError;
use crate::engine::game::{prepare_game, replay_game};
use crate::engine::sink::SnapshotSink;
use crate::engine::verify::{verify_game, Divergence};
use crate::feed::GameFeed;
use crate::topology::TopologyProvider;

/// One successfully replayed game.
#[derive(Debug, Clone)]
pub struct ReplayedGame {
    pub batch: GameBatch,
    pub divergences: Vec<Divergence>,
    pub duration_ms: f64,
}

/// Aggregated results of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub games: usize,
    pub replayed: usize,
    pub skipped: usize,
    /// Game id and reason, for games that produced no output.
    pub failed: Vec<(u64, String)>,
    pub turns: usize,
    pub records: usize,
    pub divergences: usize,
    pub game_durations_ms: Vec<f64>,
}

impl RunSummary {
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Replay Results ({} games)", self.games)];
        lines.push("=".repeat(60));
        lines.push(format!("  {:>12}: {}", "Replayed", self.replayed));
        lines.push(format!("  {:>12}: {}", "Skipped", self.skipped));
        lines.push(format!("  {:>12}: {}", "Failed", self.failed.len()));
        lines.push(format!("  {:>12}: {}", "Turns", self.turns));
        lines.push(format!("  {:>12}: {}", "Records", self.records));
        if self.divergences > 0 {
            lines.push(format!("  {:>12}: {}", "Divergences", self.divergences));
        }
        for (game_id, reason) in &self.failed {
            lines.push(format!("    game {game_id}: {reason}"));
        }
        if !self.game_durations_ms.is_empty() {
            let total_ms = self.game_durations_ms.iter().sum::<f64>();
            let avg_ms = total_ms / self.game_durations_ms.len() as f64;
            lines.push(format!("  Avg game: {:.1}ms  |  Total: {:.2}s", avg_ms, total_ms / 1000.0));
        }
        lines.join("\n")
    }
}

/// Replay one feed. `Ok(None)` means the feed had nothing to replay.
pub fn replay_feed(
    feed: &GameFeed,
    topology: &dyn TopologyProvider,
    verify: bool,
) -> Result<Option<ReplayedGame>, GameError> {
    let t0 = Instant::now();
    let wrap = |e| GameError::new(feed.id, e);

    let Some(game) = prepare_game(feed, topology).map_err(wrap)? else {
        return Ok(None);
    };
    let snapshots = replay_game(&game).map_err(wrap)?;
    let divergences = if verify {
        verify_game(&game, &snapshots)
    } else {
        Vec::new()
    };
    for divergence in &divergences {
        tracing::warn!(game_id = game.game_id, %divergence, "replay diverges from standing");
    }

    Ok(Some(ReplayedGame {
        batch: emit_game(&game, &snapshots),
        divergences,
        duration_ms: t0.elapsed().as_secs_f64() * 1000.0,
    }))
}

/// Replay `feeds` on `workers` threads (0 = all cores) and write each
/// replayed game to `sink` in input order.
pub fn replay_feeds(
    feeds: &[GameFeed],
    topology: &dyn TopologyProvider,
    workers: usize,
    verify: bool,
    sink: &mut dyn SnapshotSink,
    progress_callback: Option<&(dyn Fn(usize, usize) + Sync)>,
) -> RunSummary {
    let total = feeds.len();
    let done = AtomicUsize::new(0);
    let run = || -> Vec<Result<Option<ReplayedGame>, GameError>> {
        feeds
            .par_iter()
            .map(|feed| {
                let result = replay_feed(feed, topology, verify);
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = progress_callback {
                    cb(finished, total);
                }
                result
            })
            .collect()
    };

    let results = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(run),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build replay pool, using the global pool");
            run()
        }
    };

    let mut summary = RunSummary {
        games: total,
        ..RunSummary::default()
    };
    for (feed, result) in feeds.iter().zip(results) {
        match result {
            Ok(None) => summary.skipped += 1,
            Ok(Some(game)) => match sink.write_game(&game.batch) {
                Ok(()) => {
                    summary.replayed += 1;
                    summary.turns += game.batch.turns.len();
                    summary.records += game.batch.record_count();
                    summary.divergences += game.divergences.len();
                    summary.game_durations_ms.push(game.duration_ms);
                    tracing::info!(
                        game_id = game.batch.game_id,
                        turns = game.batch.turns.len(),
                        records = game.batch.record_count(),
                        "game replayed"
                    );
                }
                Err(e) => {
                    tracing::error!(game_id = feed.id, error = %e, "failed to write game batch");
                    summary.failed.push((feed.id, e.to_string()));
                }
            },
            Err(e) => {
                tracing::error!(game_id = e.game_id, error = %e.source, "game replay aborted");
                summary.failed.push((e.game_id, e.source.to_string()));
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::SinkError;
    use crate::engine::sink::MemorySink;
    use crate::topology::TopologyCache;

    fn feed(id: u64, deploy_on: u32) -> GameFeed {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "templateID": 1,
            "players": [{"id": "9910002200", "name": "one", "state": "Won"}],
            "map": {
                "id": 3,
                "territories": [{"id": 1, "connectedTo": [2]}, {"id": 2, "connectedTo": [1]}],
                "bonuses": []
            },
            "settings": {},
            "distributionStanding": [
                {"terrID": 1, "ownedBy": "AvailableForDistribution", "armies": 4},
                {"terrID": 2, "ownedBy": "Neutral", "armies": 2}
            ],
            "picks": {"player_100022": [1]},
            "standing0": [
                {"terrID": 1, "ownedBy": "100022", "armies": 4},
                {"terrID": 2, "ownedBy": "Neutral", "armies": 2}
            ],
            "turn0": {"date": "01/01/2021 00:00:00", "orders": [
                {"type": "GameOrderDeploy", "playerID": "100022", "deployOn": deploy_on, "armies": 5}
            ]}
        }))
        .unwrap()
    }

    struct FailingSink;

    impl SnapshotSink for FailingSink {
        fn write_game(&mut self, _batch: &GameBatch) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_bad_game_is_isolated_and_order_kept() {
        // Game 2 deploys on a territory it does not own.
        let feeds = vec![feed(1, 1), feed(2, 2), feed(3, 1)];
        let mut cache = TopologyCache::new();
        for f in &feeds {
            cache.warm_from_feed(f).unwrap();
        }
        let topology = cache.freeze();

        let progressed = AtomicUsize::new(0);
        let progress = |done: usize, total: usize| {
            assert!(done <= total);
            progressed.fetch_add(1, Ordering::Relaxed);
        };
        let mut sink = MemorySink::default();
        let summary = replay_feeds(&feeds, &topology, 2, true, &mut sink, Some(&progress));

        assert_eq!(progressed.load(Ordering::Relaxed), 3);
        assert_eq!(summary.replayed, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, 2);
        assert_eq!(sink.batches.iter().map(|b| b.game_id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(summary.turns, 4);
        assert!(summary.summary().contains("Replayed: 2"));
    }

    #[test]
    fn test_sink_failure_counts_as_failed() {
        let feeds = vec![feed(1, 1)];
        let mut cache = TopologyCache::new();
        cache.warm_from_feed(&feeds[0]).unwrap();
        let summary = replay_feeds(&feeds, &cache.freeze(), 1, false, &mut FailingSink, None);
        assert_eq!(summary.replayed, 0);
        assert_eq!(summary.failed, vec![(1, "io error: disk full".to_string())]);
    }
}
