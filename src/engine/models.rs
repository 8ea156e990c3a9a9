//! Core replay data types: identities, typed orders, per-player state and
//! per-turn snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TerritoryId = u32;
pub type BonusId = u32;
pub type Armies = i32;
pub type TurnNumber = i32;

/// The distribution (pick) turn. Numbered turns start at 0.
pub const PICK_TURN: TurnNumber = -1;

/// Board state before picks; errors in map and baseline data report it.
pub const BASELINE_TURN: TurnNumber = -2;

/// Per-game player identity, assigned in participant-list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    Neutral,
    Player(PlayerId),
}

impl Owner {
    pub fn player(self) -> Option<PlayerId> {
        match self {
            Owner::Neutral => None,
            Owner::Player(p) => Some(p),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Neutral => write!(f, "neutral"),
            Owner::Player(p) => write!(f, "{p}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    /// Account id as sent in the feed's participant list.
    pub account_id: String,
    /// Id the feed's orders and picks refer to.
    pub api_id: String,
    pub name: String,
    /// End state reported by the service ("Won", "Eliminated", ...).
    pub end_state: String,
}

/// Participants of one game, created once when the player list is parsed.
#[derive(Debug, Clone, Default)]
pub struct PlayerRegistry {
    players: Vec<Player>,
    by_api_id: HashMap<String, PlayerId>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, account_id: &str, api_id: &str, name: &str, end_state: &str) -> PlayerId {
        if let Some(&id) = self.by_api_id.get(api_id) {
            return id;
        }
        let id = PlayerId(self.players.len() as u32);
        self.players.push(Player {
            id,
            account_id: account_id.to_string(),
            api_id: api_id.to_string(),
            name: name.to_string(),
            end_state: end_state.to_string(),
        });
        self.by_api_id.insert(api_id.to_string(), id);
        id
    }

    pub fn resolve(&self, api_id: &str) -> Option<PlayerId> {
        self.by_api_id.get(api_id).copied()
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// How a territory starts the game, read off the distribution standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerritoryBaseline {
    OutOfDistribution,
    Wasteland,
    InDistribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackTransferMode {
    AttackTransfer,
    Attack,
    Transfer,
}

/// Server-resolved result of an attack/transfer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub is_attack: bool,
    pub is_successful: bool,
    /// Armies actually committed, after percentage resolution.
    pub committed: Armies,
    pub attacker_losses: Armies,
    pub defender_losses: Armies,
    pub offense_luck: f64,
    pub defense_luck: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderKind {
    Pick {
        territory: TerritoryId,
        success: bool,
    },
    AutoPick {
        territory: TerritoryId,
    },
    Deploy {
        territory: TerritoryId,
        armies: Armies,
    },
    AttackTransfer {
        from: TerritoryId,
        to: TerritoryId,
        /// Requested size: an army count, or a percentage when `by_percent`.
        requested: Armies,
        by_percent: bool,
        attack_teammates: bool,
        mode: AttackTransferMode,
        outcome: AttackOutcome,
    },
    Blockade {
        territory: TerritoryId,
    },
    /// Card bookkeeping with no board effect (receive card, reinforcement,
    /// order priority, ...).
    BasicCardOrPlayCard {
        order_type: String,
        target_player: Option<PlayerId>,
        target_bonus: Option<BonusId>,
    },
    /// Recorded for audit only, never applied.
    Unsupported {
        order_type: String,
        /// Raw `playerID` when it names no participant.
        actor: Option<String>,
    },
}

pub const RECEIVE_CARD_ORDER: &str = "GameOrderReceiveCard";
const PLAY_CARD_PREFIX: &str = "GameOrderPlayCard";

/// Card name a play-card order type consumes, e.g. `Reinforcement` for
/// `GameOrderPlayCardReinforcement`.
pub fn played_card(order_type: &str) -> Option<&str> {
    order_type.strip_prefix(PLAY_CARD_PREFIX).filter(|name| !name.is_empty())
}

/// One player's holding of one card type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardState {
    pub completed_cards: u32,
    /// Pieces still missing before the next card completes; never 0.
    pub pieces_until_next_card: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// `None` only on unsupported records whose actor is not a
    /// participant (AI or system records).
    pub player: Option<PlayerId>,
    pub turn: TurnNumber,
    /// Application order within the turn.
    pub sequence: u32,
    pub kind: OrderKind,
}

/// One turn's classified orders, ready for the replay engine.
#[derive(Debug, Clone)]
pub struct TurnOrders {
    pub turn: TurnNumber,
    pub committed_at: Option<DateTime<Utc>>,
    pub orders: Vec<Order>,
}

/// Live per-player bookkeeping, mutated in place by the replay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player: PlayerId,
    /// Owned territories only.
    pub territories: BTreeMap<TerritoryId, Armies>,
    pub bonuses: BTreeSet<BonusId>,
    pub income: i32,
    pub armies_on_board: Armies,
    pub armies_deployed: Armies,
    pub cumulative_armies_deployed: Armies,
    pub territories_controlled: u32,
    /// Keyed by card name (`Reinforcement`, `Blockade`, ...).
    pub cards: BTreeMap<String, CardState>,
}

impl PlayerState {
    pub fn new(player: PlayerId, base_income: i32) -> Self {
        Self {
            player,
            territories: BTreeMap::new(),
            bonuses: BTreeSet::new(),
            income: base_income,
            armies_on_board: 0,
            armies_deployed: 0,
            cumulative_armies_deployed: 0,
            territories_controlled: 0,
            cards: BTreeMap::new(),
        }
    }

    pub fn owns(&self, territory: TerritoryId) -> bool {
        self.territories.contains_key(&territory)
    }

    /// Armies free to move when one army must stand guard on every territory.
    pub fn movable_armies(&self, one_army_stands_guard: bool) -> Armies {
        if one_army_stands_guard {
            self.armies_on_board - self.territories_controlled as Armies
        } else {
            self.armies_on_board
        }
    }
}

/// Immutable copy of the whole game state at the end of one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    pub turn: TurnNumber,
    pub committed_at: Option<DateTime<Utc>>,
    pub players: Vec<PlayerState>,
    pub ownership: BTreeMap<TerritoryId, Owner>,
    pub neutral_armies: BTreeMap<TerritoryId, Armies>,
}

impl TurnSnapshot {
    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.player == id)
    }

    pub fn neutral_count(&self) -> usize {
        self.ownership.values().filter(|o| **o == Owner::Neutral).count()
    }
}
