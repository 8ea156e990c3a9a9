//! Error taxonomy for feed import and replay.
//!
//! Every core failure is scoped to one game: it aborts that game's replay
//! and nothing of the game is emitted. Unsupported order kinds are not
//! errors and never reach this module.

use thiserror::Error;

use crate::engine::models::{Owner, PlayerId, TerritoryId, TurnNumber};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("malformed feed: {0}")]
    Feed(String),

    #[error("turn {turn}, order {order:?}: unknown territory {territory}")]
    UnknownTerritory {
        turn: TurnNumber,
        order: Option<u32>,
        territory: i64,
    },

    #[error("turn {turn}, order {order:?}: unknown player {player:?}")]
    UnknownPlayer {
        turn: TurnNumber,
        order: Option<u32>,
        player: String,
    },

    #[error("turn {turn}, order {order:?}: unknown bonus {bonus}")]
    UnknownBonus {
        turn: TurnNumber,
        order: Option<u32>,
        bonus: i64,
    },

    #[error("turn {turn}, order {order:?}: missing field `{field}`")]
    MissingField {
        turn: TurnNumber,
        order: Option<u32>,
        field: &'static str,
    },

    #[error("turn {turn}, order {order:?}: malformed `{field}`: {value}")]
    MalformedField {
        turn: TurnNumber,
        order: Option<u32>,
        field: &'static str,
        value: String,
    },

    #[error("template {template_id} is bound to map {template_map}, feed declares map {feed_map}")]
    TemplateMapMismatch {
        template_id: u64,
        template_map: u64,
        feed_map: u64,
    },

    #[error("turn {turn}, order {order}: territory {territory} expected owner {expected}, board says {actual}")]
    OwnershipContradiction {
        turn: TurnNumber,
        order: u32,
        territory: TerritoryId,
        expected: Owner,
        actual: Owner,
    },

    #[error("turn {turn}, order {order}: player {player} has {available} armies on territory {territory}, order removes {requested}")]
    ArmyUnderflow {
        turn: TurnNumber,
        order: u32,
        player: PlayerId,
        territory: TerritoryId,
        available: i32,
        requested: i32,
    },

    #[error("turn {turn}, order {order}: player {player} attacks territory {territory} it already owns")]
    SelfAttack {
        turn: TurnNumber,
        order: u32,
        player: PlayerId,
        territory: TerritoryId,
    },

    #[error("missing standing for turn {turn}")]
    MissingStanding { turn: TurnNumber },

    #[error("unknown map {0}")]
    UnknownMap(u64),

    #[error("unknown template {0}")]
    UnknownTemplate(u64),

    #[error("map {map_id} is cached with {cached:?} ids, {requested:?} requested")]
    KeyingMismatch {
        map_id: u64,
        cached: crate::topology::IdKeying,
        requested: crate::topology::IdKeying,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A [`ReplayError`] tagged with the game it aborted.
#[derive(Debug, Error)]
#[error("game {game_id}: {source}")]
pub struct GameError {
    pub game_id: u64,
    #[source]
    pub source: ReplayError,
}

impl GameError {
    pub fn new(game_id: u64, source: ReplayError) -> Self {
        Self { game_id, source }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialisation error: {0}")]
    Json(#[from] serde_json::Error),
}
