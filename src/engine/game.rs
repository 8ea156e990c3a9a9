//! Per-game import: feed + topology -> classified turns, then replay.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::classifier::OrderClassifier;
use crate::engine::error::ReplayError;
use crate::engine::models::*;
use crate::engine::picks::{pick_requests, resolve_picks};
use crate::engine::replay::ReplayEngine;
use crate::engine::standing::{classify_baseline, resolve_standing, Standing};
use crate::feed::GameFeed;
use crate::topology::{MapTopology, TemplateRules, TopologyProvider};

/// Everything the replay needs for one game, fully resolved.
#[derive(Debug, Clone)]
pub struct PreparedGame {
    pub game_id: u64,
    pub name: String,
    pub template_id: u64,
    pub map: Arc<MapTopology>,
    pub rules: Arc<TemplateRules>,
    pub players: PlayerRegistry,
    pub baseline: BTreeMap<TerritoryId, TerritoryBaseline>,
    /// Pick turn first, then numbered turns in ascending order.
    pub turns: Vec<TurnOrders>,
    /// Authoritative standings keyed by the turn they close (`standing0`
    /// closes the pick turn).
    pub standings: BTreeMap<TurnNumber, Standing>,
}

/// Resolve a feed against the topology. Returns `Ok(None)` for feeds that
/// carry nothing to replay: no map (the game ended during picks) or no
/// picks (automatic distribution).
pub fn prepare_game(feed: &GameFeed, topology: &dyn TopologyProvider) -> Result<Option<PreparedGame>, ReplayError> {
    let Some(feed_map) = feed.map.as_ref() else {
        tracing::warn!(game_id = feed.id, "feed has no map node, skipping");
        return Ok(None);
    };
    let Some(picks) = feed.picks.as_ref() else {
        tracing::warn!(game_id = feed.id, "feed has no picks node, skipping");
        return Ok(None);
    };

    let rules = topology.template(feed.template_id)?;
    if rules.map_id != feed_map.id {
        return Err(ReplayError::TemplateMapMismatch {
            template_id: feed.template_id,
            template_map: rules.map_id,
            feed_map: feed_map.id,
        });
    }
    let map = topology.map(feed_map.id)?;

    let mut players = PlayerRegistry::new();
    for player in &feed.players {
        let api_id = player.api_id().ok_or_else(|| ReplayError::MalformedField {
            turn: BASELINE_TURN,
            order: None,
            field: "players.id",
            value: player.id.clone(),
        })?;
        players.register(&player.id, api_id, &player.name, &player.state);
    }

    let distribution = feed
        .distribution_standing
        .as_deref()
        .ok_or(ReplayError::MissingStanding { turn: BASELINE_TURN })?;
    let distribution = resolve_standing(distribution, &map, &players, BASELINE_TURN)?;
    let baseline = classify_baseline(&distribution, &map, &rules);

    let mut standings = BTreeMap::new();
    for (index, raw) in feed.standings()? {
        let closes = index as TurnNumber + PICK_TURN;
        standings.insert(closes, resolve_standing(&raw, &map, &players, closes)?);
    }

    let after_picks = standings
        .get(&PICK_TURN)
        .ok_or(ReplayError::MissingStanding { turn: PICK_TURN })?;
    let requests = pick_requests(picks, &map, &players)?;
    let mut turns = vec![TurnOrders {
        turn: PICK_TURN,
        committed_at: None,
        orders: resolve_picks(&requests, &distribution, after_picks),
    }];

    let classifier = OrderClassifier::new(&map, &players);
    for (index, feed_turn) in feed.turns()? {
        let turn = index as TurnNumber;
        turns.push(TurnOrders {
            turn,
            committed_at: feed_turn.committed_at(turn)?,
            orders: classifier.classify_turn(turn, &feed_turn.orders)?,
        });
    }

    tracing::debug!(
        game_id = feed.id,
        players = players.len(),
        turns = turns.len(),
        "prepared game"
    );

    Ok(Some(PreparedGame {
        game_id: feed.id,
        name: feed.name.clone(),
        template_id: feed.template_id,
        map,
        rules,
        players,
        baseline,
        turns,
        standings,
    }))
}

/// Replay every turn, returning one snapshot per turn in turn order. Any
/// error discards the whole game.
pub fn replay_game(game: &PreparedGame) -> Result<Vec<TurnSnapshot>, ReplayError> {
    let mut engine = ReplayEngine::new(&game.map, &game.rules, &game.players, &game.baseline);
    game.turns.iter().map(|turn| engine.apply_turn(turn)).collect()
}
