//! Read-only map topology and template rules.
//!
//! A game's map (territories, adjacency, bonus regions) and its template's
//! rule parameters never change during replay. They are built once, from
//! the feed or from a stored copy, and shared behind `Arc`.

pub mod cache;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::error::ReplayError;
use crate::engine::models::{Armies, BonusId, CardState, TerritoryBaseline, TerritoryId, BASELINE_TURN};
use crate::feed::{value_as_i64, FeedCardSetting, FeedMap, FeedSettings};

pub use cache::{JsonDirSource, Topology, TopologyCache, TopologySource};

/// Which id space a cached map is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKeying {
    /// Ids as they appear in the game feed's orders and standings.
    Feed,
    /// Ids assigned by the storage layer.
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territory {
    pub id: TerritoryId,
    pub name: String,
    pub connected: BTreeSet<TerritoryId>,
    pub bonus_ids: BTreeSet<BonusId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusRegion {
    pub id: BonusId,
    pub name: String,
    pub base_value: i32,
    pub territory_ids: BTreeSet<TerritoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTopology {
    pub map_id: u64,
    pub name: String,
    pub keying: IdKeying,
    pub territories: BTreeMap<TerritoryId, Territory>,
    pub bonuses: BTreeMap<BonusId, BonusRegion>,
}

impl MapTopology {
    pub fn territory(&self, id: TerritoryId) -> Option<&Territory> {
        self.territories.get(&id)
    }

    pub fn bonus(&self, id: BonusId) -> Option<&BonusRegion> {
        self.bonuses.get(&id)
    }

    pub fn territory_count(&self) -> usize {
        self.territories.len()
    }

    /// Build from the feed's `map` node. Territory membership of bonuses is
    /// derived from each bonus's territory list.
    pub fn from_feed(map: &FeedMap) -> Result<Self, ReplayError> {
        let mut territories = BTreeMap::new();
        for node in &map.territories {
            let connected = node
                .connected_to
                .iter()
                .map(|v| feed_id(v, "connectedTo"))
                .collect::<Result<BTreeSet<_>, _>>()?;
            territories.insert(
                node.id,
                Territory {
                    id: node.id,
                    name: node.name.clone(),
                    connected,
                    bonus_ids: BTreeSet::new(),
                },
            );
        }

        let mut bonuses = BTreeMap::new();
        for node in &map.bonuses {
            let mut members = BTreeSet::new();
            for value in &node.territory_ids {
                let territory_id = feed_id(value, "territoryIDs")?;
                let territory = territories.get_mut(&territory_id).ok_or(
                    ReplayError::UnknownTerritory {
                        turn: BASELINE_TURN,
                        order: None,
                        territory: territory_id as i64,
                    },
                )?;
                territory.bonus_ids.insert(node.id);
                members.insert(territory_id);
            }
            bonuses.insert(
                node.id,
                BonusRegion {
                    id: node.id,
                    name: node.name.clone(),
                    base_value: node.value,
                    territory_ids: members,
                },
            );
        }

        Ok(Self {
            map_id: map.id,
            name: map.name.clone(),
            keying: IdKeying::Feed,
            territories,
            bonuses,
        })
    }
}

fn feed_id(value: &serde_json::Value, field: &'static str) -> Result<TerritoryId, ReplayError> {
    value_as_i64(value)
        .and_then(|v| TerritoryId::try_from(v).ok())
        .ok_or_else(|| ReplayError::MalformedField {
            turn: BASELINE_TURN,
            order: None,
            field,
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    StraightRound,
    WeightedRandom,
}

/// Template rule parameters, immutable per game.
///
/// Kill rates, luck, rounding, percentage attacks and local deployment are
/// already folded into each resolved attack outcome; the replay keeps them
/// for output and for forward simulation, not for arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRules {
    pub template_id: u64,
    pub map_id: u64,
    pub base_income: i32,
    pub initial_armies: i32,
    pub out_distribution_neutrals: i32,
    pub in_distribution_neutrals: i32,
    pub wasteland_count: i32,
    pub wasteland_size: i32,
    pub one_army_stands_guard: bool,
    pub rounding: RoundingMode,
    pub local_deployment: bool,
    pub allow_percentage_attacks: bool,
    pub no_split: bool,
    pub offensive_kill_rate: i32,
    pub defensive_kill_rate: i32,
    pub luck_modifier: f64,
    pub manual_distribution: bool,
    #[serde(default)]
    pub overridden_bonuses: BTreeMap<BonusId, i32>,
    /// Enabled cards by name.
    #[serde(default)]
    pub cards: BTreeMap<String, CardSetting>,
    /// Factor applied to a blockaded territory's armies.
    #[serde(default = "default_blockade_multiplier")]
    pub blockade_multiplier: f64,
}

fn default_blockade_multiplier() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardSetting {
    pub num_pieces: u32,
    pub initial_pieces: u32,
    pub min_pieces_per_turn: u32,
    pub weight: f64,
}

impl From<&FeedCardSetting> for CardSetting {
    fn from(node: &FeedCardSetting) -> Self {
        Self {
            num_pieces: node.num_pieces,
            initial_pieces: node.initial_pieces,
            min_pieces_per_turn: node.minimum_pieces_per_turn,
            weight: node.weight,
        }
    }
}

impl CardSetting {
    /// Holding every player starts with: whole cards from the initial
    /// pieces, and the remainder counted down towards the next card.
    pub fn initial_state(&self) -> Option<CardState> {
        if self.num_pieces == 0 {
            return None;
        }
        Some(CardState {
            completed_cards: self.initial_pieces / self.num_pieces,
            pieces_until_next_card: self.num_pieces - self.initial_pieces % self.num_pieces,
        })
    }
}

impl Default for TemplateRules {
    fn default() -> Self {
        Self {
            template_id: 0,
            map_id: 0,
            base_income: 5,
            initial_armies: 4,
            out_distribution_neutrals: 2,
            in_distribution_neutrals: 4,
            wasteland_count: 0,
            wasteland_size: 10,
            one_army_stands_guard: true,
            rounding: RoundingMode::StraightRound,
            local_deployment: false,
            allow_percentage_attacks: true,
            no_split: false,
            offensive_kill_rate: 60,
            defensive_kill_rate: 70,
            luck_modifier: 0.0,
            manual_distribution: true,
            overridden_bonuses: BTreeMap::new(),
            cards: BTreeMap::new(),
            blockade_multiplier: default_blockade_multiplier(),
        }
    }
}

impl TemplateRules {
    pub fn from_settings(template_id: u64, map_id: u64, settings: &FeedSettings) -> Result<Self, ReplayError> {
        let card_nodes = settings.cards()?;
        let blockade_multiplier = card_nodes
            .get("Blockade")
            .and_then(|card| card.multiply_amount)
            .unwrap_or_else(default_blockade_multiplier);
        Ok(Self {
            template_id,
            map_id,
            base_income: settings.minimum_army_bonus,
            initial_armies: settings.initial_player_armies_per_territory,
            out_distribution_neutrals: settings.initial_non_distribution_armies,
            in_distribution_neutrals: settings.initial_neutrals_in_distribution,
            wasteland_count: settings.wastelands.number_of_wastelands,
            wasteland_size: settings.wastelands.wasteland_size,
            one_army_stands_guard: settings.one_army_stands_guard,
            rounding: if settings.rounding_mode.is_empty() || settings.rounding_mode == "StraightRound" {
                RoundingMode::StraightRound
            } else {
                RoundingMode::WeightedRandom
            },
            local_deployment: settings.local_deployments,
            allow_percentage_attacks: settings.allow_percentage_attacks,
            no_split: settings.no_split,
            offensive_kill_rate: settings.offensive_kill_rate,
            defensive_kill_rate: settings.defensive_kill_rate,
            luck_modifier: settings.luck_modifier,
            manual_distribution: settings.automatic_territory_distribution.is_empty()
                || settings.automatic_territory_distribution == "Manual",
            overridden_bonuses: settings
                .overridden_bonuses
                .iter()
                .map(|o| (o.bonus_id, o.value))
                .collect(),
            cards: card_nodes
                .iter()
                .map(|(name, node)| (name.clone(), CardSetting::from(node)))
                .collect(),
            blockade_multiplier,
        })
    }

    /// Income a completed bonus is worth under this template.
    pub fn bonus_value(&self, bonus: &BonusRegion) -> i32 {
        self.overridden_bonuses
            .get(&bonus.id)
            .copied()
            .unwrap_or(bonus.base_value)
    }

    /// Neutral garrison left behind when `armies` are blockaded, rounded to
    /// the nearest army.
    pub fn blockaded_armies(&self, armies: Armies) -> Armies {
        (f64::from(armies) * self.blockade_multiplier).round() as Armies
    }

    /// Every enabled card's starting holding, keyed by card name.
    pub fn initial_card_states(&self) -> BTreeMap<String, CardState> {
        self.cards
            .iter()
            .filter_map(|(name, setting)| setting.initial_state().map(|state| (name.clone(), state)))
            .collect()
    }

    /// Neutral garrison a territory starts with. Out-of-distribution is the
    /// default; wastelands and distributable territories override it.
    pub fn baseline_armies(&self, baseline: TerritoryBaseline) -> i32 {
        match baseline {
            TerritoryBaseline::OutOfDistribution => self.out_distribution_neutrals,
            TerritoryBaseline::Wasteland => self.wasteland_size,
            TerritoryBaseline::InDistribution => self.in_distribution_neutrals,
        }
    }
}

/// Supplies topology to importers and replay workers.
pub trait TopologyProvider: Sync {
    fn map(&self, map_id: u64) -> Result<Arc<MapTopology>, ReplayError>;
    fn template(&self, template_id: u64) -> Result<Arc<TemplateRules>, ReplayError>;
}
