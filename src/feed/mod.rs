//! Raw game feed as returned by the game service's `GameFeed` endpoint.
//!
//! Only deserialisation lives here. Cross-references (players, territories,
//! bonuses) are resolved later by the classifier against the topology and
//! the game's player registry.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::engine::error::ReplayError;
use crate::engine::models::BASELINE_TURN;

/// Timestamp format used by `turnN.date`.
pub const TURN_DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Prefix of the keys in the `picks` node, followed by the player's API id.
pub const PICKS_PLAYER_PREFIX: &str = "player_";

#[derive(Debug, Clone, Deserialize)]
pub struct GameFeed {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "numberOfTurns", default, deserialize_with = "lenient::opt_i64")]
    pub number_of_turns: Option<i64>,
    #[serde(rename = "templateID", deserialize_with = "lenient::u64")]
    pub template_id: u64,
    #[serde(default)]
    pub players: Vec<FeedPlayer>,
    #[serde(default)]
    pub map: Option<FeedMap>,
    #[serde(default)]
    pub settings: Option<FeedSettings>,
    #[serde(rename = "distributionStanding", default)]
    pub distribution_standing: Option<Vec<FeedTerritoryStanding>>,
    #[serde(default)]
    pub picks: Option<BTreeMap<String, Vec<serde_json::Value>>>,
    /// `turnN` and `standingN` nodes, plus anything else the service sends.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedPlayer {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
}

impl FeedPlayer {
    /// Id used by orders and picks: the account id without its two leading
    /// and two trailing check digits.
    pub fn api_id(&self) -> Option<&str> {
        let id = self.id.as_str();
        if id.len() <= 4 || !id.is_ascii() {
            return None;
        }
        Some(&id[2..id.len() - 2])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedMap {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub territories: Vec<FeedTerritory>,
    #[serde(default)]
    pub bonuses: Vec<FeedBonus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedTerritory {
    #[serde(deserialize_with = "lenient::u32")]
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "connectedTo", default)]
    pub connected_to: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedBonus {
    #[serde(deserialize_with = "lenient::u32")]
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "lenient::i32")]
    pub value: i32,
    #[serde(rename = "territoryIDs", default)]
    pub territory_ids: Vec<serde_json::Value>,
}

/// Template settings node. Only the fields the replay and its output use
/// are read; absent fields take the service's defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeedSettings {
    #[serde(default = "default_base_income")]
    pub minimum_army_bonus: i32,
    #[serde(default = "default_initial_armies")]
    pub initial_player_armies_per_territory: i32,
    #[serde(default = "default_out_distribution")]
    pub initial_non_distribution_armies: i32,
    #[serde(default = "default_in_distribution")]
    pub initial_neutrals_in_distribution: i32,
    #[serde(default)]
    pub wastelands: FeedWastelands,
    #[serde(default = "default_true")]
    pub one_army_stands_guard: bool,
    #[serde(default)]
    pub rounding_mode: String,
    #[serde(default)]
    pub local_deployments: bool,
    #[serde(default = "default_true")]
    pub allow_percentage_attacks: bool,
    #[serde(default)]
    pub no_split: bool,
    #[serde(default = "default_offensive_kill_rate")]
    pub offensive_kill_rate: i32,
    #[serde(default = "default_defensive_kill_rate")]
    pub defensive_kill_rate: i32,
    #[serde(default)]
    pub luck_modifier: f64,
    #[serde(default)]
    pub automatic_territory_distribution: String,
    #[serde(default)]
    pub overridden_bonuses: Vec<FeedOverriddenBonus>,
    /// Every other setting, including the `<Name>Card` nodes.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl FeedSettings {
    /// Card settings by card name (`ReinforcementCard` -> `Reinforcement`).
    /// Cards the template disables are sent as `"none"` and skipped.
    pub fn cards(&self) -> Result<BTreeMap<String, FeedCardSetting>, ReplayError> {
        let mut cards = BTreeMap::new();
        for (key, node) in &self.other {
            let Some(name) = key.strip_suffix(CARD_SETTING_SUFFIX).filter(|n| !n.is_empty()) else {
                continue;
            };
            if !node.is_object() {
                continue;
            }
            let setting = FeedCardSetting::deserialize(node).map_err(|e| ReplayError::MalformedField {
                turn: BASELINE_TURN,
                order: None,
                field: "settings.*Card",
                value: format!("{key}: {e}"),
            })?;
            cards.insert(name.to_string(), setting);
        }
        Ok(cards)
    }
}

const CARD_SETTING_SUFFIX: &str = "Card";

/// One `<Name>Card` node of the template settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeedCardSetting {
    #[serde(deserialize_with = "lenient::u32")]
    pub num_pieces: u32,
    #[serde(default, deserialize_with = "lenient::u32")]
    pub initial_pieces: u32,
    #[serde(default, deserialize_with = "lenient::u32")]
    pub minimum_pieces_per_turn: u32,
    #[serde(default)]
    pub weight: f64,
    /// Blockade and abandon garrison multiplier.
    #[serde(default)]
    pub multiply_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeedWastelands {
    #[serde(default)]
    pub number_of_wastelands: i32,
    #[serde(default = "default_wasteland_size")]
    pub wasteland_size: i32,
}

impl Default for FeedWastelands {
    fn default() -> Self {
        Self {
            number_of_wastelands: 0,
            wasteland_size: default_wasteland_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedOverriddenBonus {
    #[serde(rename = "bonusID", deserialize_with = "lenient::u32")]
    pub bonus_id: u32,
    #[serde(deserialize_with = "lenient::i32")]
    pub value: i32,
}

fn default_base_income() -> i32 {
    5
}

fn default_initial_armies() -> i32 {
    4
}

fn default_out_distribution() -> i32 {
    2
}

fn default_in_distribution() -> i32 {
    4
}

fn default_wasteland_size() -> i32 {
    10
}

fn default_offensive_kill_rate() -> i32 {
    60
}

fn default_defensive_kill_rate() -> i32 {
    70
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedTerritoryStanding {
    #[serde(rename = "terrID", deserialize_with = "lenient::u32")]
    pub terr_id: u32,
    #[serde(rename = "ownedBy", deserialize_with = "lenient::string")]
    pub owned_by: String,
    #[serde(default, deserialize_with = "lenient::i32")]
    pub armies: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedTurn {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub orders: Vec<FeedOrder>,
}

impl FeedTurn {
    pub fn committed_at(&self, turn: i32) -> Result<Option<DateTime<Utc>>, ReplayError> {
        let Some(date) = self.date.as_deref() else {
            return Ok(None);
        };
        NaiveDateTime::parse_from_str(date, TURN_DATE_FORMAT)
            .map(|naive| Some(naive.and_utc()))
            .map_err(|_| ReplayError::MalformedField {
                turn,
                order: None,
                field: "date",
                value: date.to_string(),
            })
    }
}

/// One event record of a turn. Kind-specific fields stay untyped until the
/// classifier picks a variant.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedOrder {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl GameFeed {
    /// `turnN` nodes ordered by N.
    pub fn turns(&self) -> Result<Vec<(u32, FeedTurn)>, ReplayError> {
        let mut turns = Vec::new();
        for (index, node) in numbered_nodes(&self.extra, "turn") {
            let turn: FeedTurn = serde_json::from_value(node.clone())
                .map_err(|e| ReplayError::Feed(format!("turn{index}: {e}")))?;
            turns.push((index, turn));
        }
        Ok(turns)
    }

    /// `standingN` nodes ordered by N. `standing0` is the board after picks.
    pub fn standings(&self) -> Result<Vec<(u32, Vec<FeedTerritoryStanding>)>, ReplayError> {
        let mut standings = Vec::new();
        for (index, node) in numbered_nodes(&self.extra, "standing") {
            let standing: Vec<FeedTerritoryStanding> = serde_json::from_value(node.clone())
                .map_err(|e| ReplayError::Feed(format!("standing{index}: {e}")))?;
            standings.push((index, standing));
        }
        Ok(standings)
    }
}

fn numbered_nodes<'a>(
    extra: &'a BTreeMap<String, serde_json::Value>,
    prefix: &str,
) -> Vec<(u32, &'a serde_json::Value)> {
    let mut nodes: Vec<(u32, &serde_json::Value)> = extra
        .iter()
        .filter_map(|(key, node)| {
            let index = key.strip_prefix(prefix)?.parse::<u32>().ok()?;
            Some((index, node))
        })
        .collect();
    nodes.sort_by_key(|(index, _)| *index);
    nodes
}

/// Read a JSON value that the service may send either as a number or as a
/// numeric string.
pub fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Deserialisers for ids and counts that arrive as numbers or strings.
mod lenient {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(serde_json::Number),
        Str(String),
    }

    fn parse<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: std::str::FromStr,
    {
        let raw = match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Num(n) => n.to_string(),
            NumOrStr::Str(s) => s,
        };
        raw.trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected integer, got {raw:?}")))
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        parse(d)
    }

    pub fn u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        parse(d)
    }

    pub fn i32<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        parse(d)
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        parse(d).map(Some)
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match NumOrStr::deserialize(d)? {
            NumOrStr::Num(n) => n.to_string(),
            NumOrStr::Str(s) => s,
        })
    }
}
