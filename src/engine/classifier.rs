//! Turns raw feed event records into typed [`Order`]s.
//!
//! The record's `type` selects the variant through [`ORDER_KINDS`]; kinds
//! the replay does not model (and any kind the catalog does not know) are
//! kept as [`OrderKind::Unsupported`] audit entries.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::engine::error::ReplayError;
use crate::engine::models::*;
use crate::feed::{value_as_bool, value_as_f64, value_as_i64, FeedOrder};
use crate::topology::MapTopology;

/// How a record kind is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Deploy,
    AttackTransfer,
    Blockade,
    /// Card bookkeeping and state transitions: player plus optional targets.
    Basic,
    /// Known but outside the replayed game mode.
    Unsupported,
}

pub static ORDER_KINDS: Lazy<HashMap<&'static str, RecordKind>> = Lazy::new(|| {
    use RecordKind::*;
    HashMap::from([
        ("GameOrderDeploy", Deploy),
        ("GameOrderAttackTransfer", AttackTransfer),
        ("GameOrderPlayCardBlockade", Blockade),
        ("GameOrderReceiveCard", Basic),
        ("GameOrderStateTransition", Basic),
        ("GameOrderPlayCardReinforcement", Basic),
        ("GameOrderPlayCardOrderPriority", Basic),
        ("GameOrderPlayCardOrderDelay", Basic),
        ("GameOrderPlayCardReconnaissance", Basic),
        ("GameOrderPlayCardSurveillance", Basic),
        ("GameOrderPlayCardSpy", Unsupported),
        ("GameOrderPlayCardAbandon", Unsupported),
        ("GameOrderPlayCardAirlift", Unsupported),
        ("GameOrderPlayCardGift", Unsupported),
        ("GameOrderPlayCardDiplomacy", Unsupported),
        ("GameOrderPlayCardSanctions", Unsupported),
        ("GameOrderPlayCardBomb", Unsupported),
        ("GameOrderCardWoreOff", Unsupported),
    ])
});

/// Catalog lookup; unknown kinds are unsupported.
pub fn record_kind(kind: &str) -> RecordKind {
    ORDER_KINDS.get(kind).copied().unwrap_or(RecordKind::Unsupported)
}

/// Resolves one game's event records against its map and players.
pub struct OrderClassifier<'a> {
    map: &'a MapTopology,
    players: &'a PlayerRegistry,
}

impl<'a> OrderClassifier<'a> {
    pub fn new(map: &'a MapTopology, players: &'a PlayerRegistry) -> Self {
        Self { map, players }
    }

    /// Classify a turn's records. Each order's sequence index is its
    /// position in the record list.
    pub fn classify_turn(&self, turn: TurnNumber, records: &[FeedOrder]) -> Result<Vec<Order>, ReplayError> {
        let mut orders = Vec::with_capacity(records.len());
        let mut unsupported = 0usize;
        for (sequence, record) in records.iter().enumerate() {
            let order = self.classify(turn, sequence as u32, record)?;
            if matches!(order.kind, OrderKind::Unsupported { .. }) {
                unsupported += 1;
            }
            orders.push(order);
        }
        if unsupported > 0 {
            tracing::debug!(turn, count = unsupported, "unsupported orders recorded without effect");
        }
        Ok(orders)
    }

    pub fn classify(&self, turn: TurnNumber, sequence: u32, record: &FeedOrder) -> Result<Order, ReplayError> {
        let fields = Fields {
            turn,
            order: sequence,
            record,
        };
        let kind = match record_kind(&record.kind) {
            RecordKind::Unsupported => return Ok(self.audit_entry(&fields)),
            RecordKind::Deploy => OrderKind::Deploy {
                territory: self.territory(&fields, "deployOn")?,
                armies: fields.armies("armies")?,
            },
            RecordKind::AttackTransfer => self.attack_transfer(&fields)?,
            RecordKind::Blockade => OrderKind::Blockade {
                territory: self.territory(&fields, "targetTerritoryID")?,
            },
            RecordKind::Basic => OrderKind::BasicCardOrPlayCard {
                order_type: record.kind.clone(),
                target_player: match fields.optional("targetPlayerID") {
                    Some(_) => Some(self.player(&fields, "targetPlayerID")?),
                    None => None,
                },
                target_bonus: match fields.optional("targetBonusID") {
                    Some(_) => Some(self.bonus(&fields, "targetBonusID")?),
                    None => None,
                },
            },
        };
        let player = self.player(&fields, "playerID")?;

        Ok(Order {
            player: Some(player),
            turn,
            sequence,
            kind,
        })
    }

    /// Unsupported records never touch the board, so their actor is
    /// resolved leniently: a missing or non-participant `playerID` is kept
    /// raw instead of failing the game.
    fn audit_entry(&self, fields: &Fields<'_>) -> Order {
        let raw = fields.optional("playerID").map(|value| match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        });
        let player = raw.as_deref().and_then(|api_id| self.players.resolve(api_id));
        Order {
            player,
            turn: fields.turn,
            sequence: fields.order,
            kind: OrderKind::Unsupported {
                order_type: fields.record.kind.clone(),
                actor: if player.is_some() { None } else { raw },
            },
        }
    }

    fn attack_transfer(&self, fields: &Fields<'_>) -> Result<OrderKind, ReplayError> {
        let mode = match fields.optional("attackTransfer") {
            None => AttackTransferMode::AttackTransfer,
            Some(value) => match value.as_str() {
                Some("AttackTransfer") => AttackTransferMode::AttackTransfer,
                Some("Attack") => AttackTransferMode::Attack,
                Some("Transfer") => AttackTransferMode::Transfer,
                _ => return Err(fields.malformed("attackTransfer", value)),
            },
        };

        let outcome = fields.outcome(fields.required("result")?)?;

        Ok(OrderKind::AttackTransfer {
            from: self.territory(fields, "from")?,
            to: self.territory(fields, "to")?,
            requested: fields.armies("numArmies")?,
            by_percent: fields.flag("byPercent")?,
            attack_teammates: fields.flag("attackTeammates")?,
            mode,
            outcome,
        })
    }

    fn player(&self, fields: &Fields<'_>, name: &'static str) -> Result<PlayerId, ReplayError> {
        let value = fields.required(name)?;
        let api_id = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return Err(fields.malformed(name, value)),
        };
        self.players
            .resolve(&api_id)
            .ok_or(ReplayError::UnknownPlayer {
                turn: fields.turn,
                order: Some(fields.order),
                player: api_id,
            })
    }

    fn territory(&self, fields: &Fields<'_>, name: &'static str) -> Result<TerritoryId, ReplayError> {
        let raw = fields.integer(name)?;
        TerritoryId::try_from(raw)
            .ok()
            .filter(|id| self.map.territory(*id).is_some())
            .ok_or(ReplayError::UnknownTerritory {
                turn: fields.turn,
                order: Some(fields.order),
                territory: raw,
            })
    }

    fn bonus(&self, fields: &Fields<'_>, name: &'static str) -> Result<BonusId, ReplayError> {
        let raw = fields.integer(name)?;
        BonusId::try_from(raw)
            .ok()
            .filter(|id| self.map.bonus(*id).is_some())
            .ok_or(ReplayError::UnknownBonus {
                turn: fields.turn,
                order: Some(fields.order),
                bonus: raw,
            })
    }
}

/// Field access on one record, carrying error context.
struct Fields<'r> {
    turn: TurnNumber,
    order: u32,
    record: &'r FeedOrder,
}

impl<'r> Fields<'r> {
    fn optional(&self, name: &str) -> Option<&'r Value> {
        self.record.fields.get(name).filter(|v| !v.is_null())
    }

    fn required(&self, name: &'static str) -> Result<&'r Value, ReplayError> {
        self.optional(name).ok_or(ReplayError::MissingField {
            turn: self.turn,
            order: Some(self.order),
            field: name,
        })
    }

    fn malformed(&self, name: &'static str, value: &Value) -> ReplayError {
        ReplayError::MalformedField {
            turn: self.turn,
            order: Some(self.order),
            field: name,
            value: value.to_string(),
        }
    }

    fn integer(&self, name: &'static str) -> Result<i64, ReplayError> {
        let value = self.required(name)?;
        value_as_i64(value).ok_or_else(|| self.malformed(name, value))
    }

    fn armies(&self, name: &'static str) -> Result<Armies, ReplayError> {
        let value = self.required(name)?;
        value_as_i64(value)
            .and_then(|v| Armies::try_from(v).ok())
            .ok_or_else(|| self.malformed(name, value))
    }

    fn flag(&self, name: &'static str) -> Result<bool, ReplayError> {
        match self.optional(name) {
            None => Ok(false),
            Some(value) => value_as_bool(value).ok_or_else(|| self.malformed(name, value)),
        }
    }

    /// Decode the nested `result` node of an attack/transfer record.
    fn outcome(&self, result: &Value) -> Result<AttackOutcome, ReplayError> {
        let get = |name: &'static str| {
            result.get(name).filter(|v| !v.is_null()).ok_or(ReplayError::MissingField {
                turn: self.turn,
                order: Some(self.order),
                field: name,
            })
        };
        let flag = |name: &'static str| -> Result<bool, ReplayError> {
            let value = get(name)?;
            value_as_bool(value).ok_or_else(|| self.malformed(name, value))
        };
        let count = |name: &'static str| -> Result<Armies, ReplayError> {
            let value = get(name)?;
            value_as_i64(value)
                .and_then(|v| Armies::try_from(v).ok())
                .ok_or_else(|| self.malformed(name, value))
        };
        // Absent or empty luck means the attack was resolved without luck.
        let luck = |name: &'static str| -> Result<f64, ReplayError> {
            match result.get(name) {
                None | Some(Value::Null) => Ok(0.0),
                Some(Value::String(s)) if s.trim().is_empty() => Ok(0.0),
                Some(value) => value_as_f64(value).ok_or_else(|| self.malformed(name, value)),
            }
        };

        Ok(AttackOutcome {
            is_attack: flag("isAttack")?,
            is_successful: flag("isSuccessful")?,
            committed: count("armies")?,
            attacker_losses: count("attackingArmiesKilled")?,
            defender_losses: count("defendingArmiesKilled")?,
            offense_luck: luck("offenseLuck")?,
            defense_luck: luck("defenseLuck")?,
        })
    }
}
