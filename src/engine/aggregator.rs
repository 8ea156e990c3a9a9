//! Flattens replayed snapshots into storage records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::game::PreparedGame;
use crate::engine::models::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub game_id: u64,
    pub turn: TurnNumber,
    pub committed_at: Option<DateTime<Utc>>,
    pub order_count: usize,
}

/// One player's state at the end of one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStateRecord {
    pub game_id: u64,
    pub turn: TurnNumber,
    pub player: PlayerId,
    pub account_id: String,
    pub income: i32,
    pub armies_on_board: Armies,
    pub movable_armies: Armies,
    pub armies_deployed: Armies,
    pub cumulative_armies_deployed: Armies,
    pub territories_controlled: u32,
    /// Size of the territory-armies mapping.
    pub territory_count: usize,
    pub bonuses_held: usize,
    pub bonus_ids: Vec<BonusId>,
    /// Card holdings keyed by card name, empty when the template enables none.
    pub cards: BTreeMap<String, CardState>,
}

/// All output of one game, written as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBatch {
    pub game_id: u64,
    pub template_id: u64,
    pub turns: Vec<TurnRecord>,
    /// Turn-major, players in participant order within a turn.
    pub player_states: Vec<PlayerStateRecord>,
}

impl GameBatch {
    pub fn record_count(&self) -> usize {
        self.turns.len() + self.player_states.len()
    }
}

pub fn emit_game(game: &PreparedGame, snapshots: &[TurnSnapshot]) -> GameBatch {
    let guard = game.rules.one_army_stands_guard;
    let mut batch = GameBatch {
        game_id: game.game_id,
        template_id: game.template_id,
        turns: Vec::with_capacity(snapshots.len()),
        player_states: Vec::with_capacity(snapshots.len() * game.players.len()),
    };

    for snapshot in snapshots {
        let order_count = game
            .turns
            .iter()
            .find(|t| t.turn == snapshot.turn)
            .map_or(0, |t| t.orders.len());
        batch.turns.push(TurnRecord {
            game_id: game.game_id,
            turn: snapshot.turn,
            committed_at: snapshot.committed_at,
            order_count,
        });

        for state in &snapshot.players {
            let account_id = game
                .players
                .get(state.player)
                .map(|p| p.account_id.clone())
                .unwrap_or_default();
            batch.player_states.push(PlayerStateRecord {
                game_id: game.game_id,
                turn: snapshot.turn,
                player: state.player,
                account_id,
                income: state.income,
                armies_on_board: state.armies_on_board,
                movable_armies: state.movable_armies(guard),
                armies_deployed: state.armies_deployed,
                cumulative_armies_deployed: state.cumulative_armies_deployed,
                territories_controlled: state.territories_controlled,
                territory_count: state.territories.len(),
                bonuses_held: state.bonuses.len(),
                bonus_ids: state.bonuses.iter().copied().collect(),
                cards: state.cards.clone(),
            });
        }
    }
    batch
}
