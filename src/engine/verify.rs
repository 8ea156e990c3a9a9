//! Compare replayed turns against the feed's authoritative standings.

use std::fmt;

use serde::Serialize;

use crate::engine::game::PreparedGame;
use crate::engine::models::*;
use crate::engine::standing::{Standing, StandingOwner};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    Owner {
        turn: TurnNumber,
        territory: TerritoryId,
        replayed: Owner,
        standing: Owner,
    },
    Armies {
        turn: TurnNumber,
        territory: TerritoryId,
        replayed: Armies,
        standing: Armies,
    },
    /// Territory absent from the standing.
    Missing { turn: TurnNumber, territory: TerritoryId },
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Owner { turn, territory, replayed, standing } => write!(
                f,
                "turn {turn}: territory {territory} replayed owner {replayed}, standing says {standing}"
            ),
            Divergence::Armies { turn, territory, replayed, standing } => write!(
                f,
                "turn {turn}: territory {territory} replayed {replayed} armies, standing says {standing}"
            ),
            Divergence::Missing { turn, territory } => {
                write!(f, "turn {turn}: territory {territory} missing from standing")
            }
        }
    }
}

/// Ownership and army count of every territory. Fogged entries carry no
/// information and are skipped.
pub fn compare_turn(snapshot: &TurnSnapshot, standing: &Standing) -> Vec<Divergence> {
    let turn = snapshot.turn;
    let mut divergences = Vec::new();
    for (&territory, &replayed) in &snapshot.ownership {
        let Some(entry) = standing.get(&territory) else {
            divergences.push(Divergence::Missing { turn, territory });
            continue;
        };
        let expected = match entry.owner {
            StandingOwner::Fogged => continue,
            StandingOwner::Neutral | StandingOwner::AvailableForDistribution => Owner::Neutral,
            StandingOwner::Player(p) => Owner::Player(p),
        };
        if replayed != expected {
            divergences.push(Divergence::Owner {
                turn,
                territory,
                replayed,
                standing: expected,
            });
            continue;
        }
        let armies = match replayed {
            Owner::Player(p) => snapshot.player(p).and_then(|s| s.territories.get(&territory)),
            Owner::Neutral => snapshot.neutral_armies.get(&territory),
        }
        .copied()
        .unwrap_or(0);
        if armies != entry.armies {
            divergences.push(Divergence::Armies {
                turn,
                territory,
                replayed: armies,
                standing: entry.armies,
            });
        }
    }
    divergences
}

/// Check every snapshot that has a matching standing.
pub fn verify_game(game: &PreparedGame, snapshots: &[TurnSnapshot]) -> Vec<Divergence> {
    snapshots
        .iter()
        .filter_map(|snapshot| {
            game.standings
                .get(&snapshot.turn)
                .map(|standing| compare_turn(snapshot, standing))
        })
        .flatten()
        .collect()
}
