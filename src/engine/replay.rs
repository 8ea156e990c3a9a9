//! The replay state machine.
//!
//! One [`ReplayEngine`] per game owns the live board (ownership, neutral
//! garrisons, per-player state) and mutates it in place, order by order.
//! After every turn it hands out an immutable [`TurnSnapshot`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::engine::error::ReplayError;
use crate::engine::models::*;
use crate::topology::{MapTopology, TemplateRules};

pub struct ReplayEngine<'g> {
    map: &'g MapTopology,
    rules: &'g TemplateRules,
    players: Vec<PlayerState>,
    ownership: BTreeMap<TerritoryId, Owner>,
    neutral_armies: BTreeMap<TerritoryId, Armies>,
}

impl<'g> ReplayEngine<'g> {
    /// Every territory starts neutral with its baseline garrison. Territories
    /// missing from `baseline` default to out-of-distribution.
    pub fn new(
        map: &'g MapTopology,
        rules: &'g TemplateRules,
        players: &PlayerRegistry,
        baseline: &BTreeMap<TerritoryId, TerritoryBaseline>,
    ) -> Self {
        let ownership = map.territories.keys().map(|&id| (id, Owner::Neutral)).collect();
        let neutral_armies = map
            .territories
            .keys()
            .map(|&id| {
                let kind = baseline
                    .get(&id)
                    .copied()
                    .unwrap_or(TerritoryBaseline::OutOfDistribution);
                (id, rules.baseline_armies(kind))
            })
            .collect();
        Self {
            map,
            rules,
            players: players
                .iter()
                .map(|p| PlayerState {
                    cards: rules.initial_card_states(),
                    ..PlayerState::new(p.id, rules.base_income)
                })
                .collect(),
            ownership,
            neutral_armies,
        }
    }

    pub fn owner(&self, territory: TerritoryId) -> Option<Owner> {
        self.ownership.get(&territory).copied()
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(id.0 as usize)
    }

    pub fn neutral_armies(&self, territory: TerritoryId) -> Option<Armies> {
        self.neutral_armies.get(&territory).copied()
    }

    /// Apply one turn in ascending sequence order and snapshot the result.
    pub fn apply_turn(&mut self, turn: &TurnOrders) -> Result<TurnSnapshot, ReplayError> {
        for state in &mut self.players {
            state.armies_deployed = 0;
        }

        let mut orders: Vec<&Order> = turn.orders.iter().collect();
        orders.sort_by_key(|o| o.sequence);
        for order in orders {
            self.apply(order)?;
        }

        tracing::debug!(turn = turn.turn, orders = turn.orders.len(), "turn replayed");
        Ok(self.snapshot(turn.turn, turn.committed_at))
    }

    /// Apply a single order to the live board.
    pub fn apply(&mut self, order: &Order) -> Result<(), ReplayError> {
        match order.kind {
            OrderKind::Pick { territory, success: true } | OrderKind::AutoPick { territory } => {
                self.apply_pick(order, territory)
            }
            OrderKind::Pick { success: false, .. } => Ok(()),
            OrderKind::Deploy { territory, armies } => self.apply_deploy(order, territory, armies),
            OrderKind::AttackTransfer {
                from,
                to,
                ref outcome,
                ..
            } => {
                if outcome.committed == 0 {
                    return Ok(());
                }
                if outcome.is_attack {
                    self.apply_attack(order, from, to, outcome)
                } else {
                    self.apply_transfer(order, from, to, outcome.committed)
                }
            }
            OrderKind::Blockade { territory } => {
                self.play_card(order, "Blockade")?;
                self.apply_blockade(order, territory)
            }
            OrderKind::BasicCardOrPlayCard { ref order_type, .. } => {
                if order_type == RECEIVE_CARD_ORDER {
                    self.receive_card_pieces(order)
                } else if let Some(card) = played_card(order_type) {
                    self.play_card(order, card)
                } else {
                    Ok(())
                }
            }
            OrderKind::Unsupported { .. } => Ok(()),
        }
    }

    pub fn snapshot(&self, turn: TurnNumber, committed_at: Option<DateTime<Utc>>) -> TurnSnapshot {
        TurnSnapshot {
            turn,
            committed_at,
            players: self.players.clone(),
            ownership: self.ownership.clone(),
            neutral_armies: self.neutral_armies.clone(),
        }
    }

    fn apply_pick(&mut self, order: &Order, territory: TerritoryId) -> Result<(), ReplayError> {
        let player = actor(order)?;
        self.expect_owner(order, territory, Owner::Neutral)?;
        self.neutral_armies.remove(&territory);
        let armies = self.rules.initial_armies;
        self.gain_territory(order, player, territory, armies)?;
        self.state_mut(order)?.armies_on_board += armies;
        Ok(())
    }

    fn apply_deploy(&mut self, order: &Order, territory: TerritoryId, armies: Armies) -> Result<(), ReplayError> {
        self.expect_owner(order, territory, Owner::Player(actor(order)?))?;
        let state = self.state_mut(order)?;
        *state.territories.entry(territory).or_insert(0) += armies;
        state.armies_on_board += armies;
        state.armies_deployed += armies;
        state.cumulative_armies_deployed += armies;
        Ok(())
    }

    fn apply_transfer(
        &mut self,
        order: &Order,
        from: TerritoryId,
        to: TerritoryId,
        committed: Armies,
    ) -> Result<(), ReplayError> {
        let mover = Owner::Player(actor(order)?);
        self.expect_owner(order, from, mover)?;
        self.expect_owner(order, to, mover)?;
        let state = self.state_mut(order)?;
        withdraw(order, state, from, committed)?;
        *state.territories.entry(to).or_insert(0) += committed;
        Ok(())
    }

    fn apply_attack(
        &mut self,
        order: &Order,
        from: TerritoryId,
        to: TerritoryId,
        outcome: &AttackOutcome,
    ) -> Result<(), ReplayError> {
        let attacker = actor(order)?;
        self.expect_owner(order, from, Owner::Player(attacker))?;
        let defender = self.current_owner(order, to)?;
        if defender == Owner::Player(attacker) {
            return Err(ReplayError::SelfAttack {
                turn: order.turn,
                order: order.sequence,
                player: attacker,
                territory: to,
            });
        }

        if outcome.is_successful {
            // Committed armies leave the source; survivors occupy the target.
            let state = self.state_mut(order)?;
            withdraw(order, state, from, outcome.committed)?;
            state.armies_on_board -= outcome.attacker_losses;

            match defender {
                Owner::Neutral => {
                    self.neutral_armies.remove(&to);
                }
                Owner::Player(defender) => {
                    let garrison = self.lose_territory(order, defender, to)?;
                    self.state_of_mut(order, defender)?.armies_on_board -= garrison;
                }
            }
            self.gain_territory(order, attacker, to, outcome.committed - outcome.attacker_losses)?;
        } else {
            let state = self.state_mut(order)?;
            withdraw(order, state, from, outcome.attacker_losses)?;
            state.armies_on_board -= outcome.attacker_losses;

            match defender {
                Owner::Neutral => {
                    if let Some(garrison) = self.neutral_armies.get_mut(&to) {
                        *garrison = (*garrison - outcome.defender_losses).max(0);
                    }
                }
                Owner::Player(defender) => {
                    let state = self.state_of_mut(order, defender)?;
                    withdraw(order, state, to, outcome.defender_losses)?;
                    state.armies_on_board -= outcome.defender_losses;
                }
            }
        }
        Ok(())
    }

    fn apply_blockade(&mut self, order: &Order, territory: TerritoryId) -> Result<(), ReplayError> {
        let player = actor(order)?;
        if self.current_owner(order, territory)? != Owner::Player(player) {
            tracing::debug!(
                turn = order.turn,
                order = order.sequence,
                territory,
                "blockade target no longer owned, skipped"
            );
            return Ok(());
        }
        let armies = self.lose_territory(order, player, territory)?;
        self.state_mut(order)?.armies_on_board -= armies;
        self.neutral_armies.insert(territory, self.rules.blockaded_armies(armies));
        Ok(())
    }

    /// A received card order hands the player one piece of every enabled
    /// card; a card completes when its last missing piece arrives.
    fn receive_card_pieces(&mut self, order: &Order) -> Result<(), ReplayError> {
        let rules = self.rules;
        let state = self.state_mut(order)?;
        for (name, holding) in state.cards.iter_mut() {
            if holding.pieces_until_next_card > 1 {
                holding.pieces_until_next_card -= 1;
                continue;
            }
            holding.completed_cards += 1;
            holding.pieces_until_next_card = rules.cards.get(name).map_or(1, |setting| setting.num_pieces.max(1));
        }
        Ok(())
    }

    fn play_card(&mut self, order: &Order, card: &str) -> Result<(), ReplayError> {
        let state = self.state_mut(order)?;
        let player = state.player;
        match state.cards.get_mut(card) {
            Some(holding) if holding.completed_cards > 0 => holding.completed_cards -= 1,
            Some(_) => {
                tracing::debug!(turn = order.turn, order = order.sequence, %player, card, "card played without a completed card");
            }
            None => {
                tracing::debug!(turn = order.turn, order = order.sequence, %player, card, "card not enabled by template");
            }
        }
        Ok(())
    }

    /// Territory-gain: ownership, count and newly completed bonuses.
    fn gain_territory(
        &mut self,
        order: &Order,
        player: PlayerId,
        territory: TerritoryId,
        armies: Armies,
    ) -> Result<(), ReplayError> {
        let map = self.map;
        let rules = self.rules;
        self.ownership.insert(territory, Owner::Player(player));
        let state = self.state_of_mut(order, player)?;
        state.territories.insert(territory, armies);
        state.territories_controlled += 1;

        let Some(node) = map.territory(territory) else {
            return Ok(());
        };
        for bonus_id in &node.bonus_ids {
            if state.bonuses.contains(bonus_id) {
                continue;
            }
            let Some(bonus) = map.bonus(*bonus_id) else {
                continue;
            };
            if bonus.territory_ids.iter().all(|t| state.territories.contains_key(t)) {
                state.bonuses.insert(*bonus_id);
                state.income += rules.bonus_value(bonus);
            }
        }
        Ok(())
    }

    /// Territory-loss: drops the territory and any bonus it breaks, and
    /// marks it neutral. Returns the armies that stood on it.
    fn lose_territory(&mut self, order: &Order, player: PlayerId, territory: TerritoryId) -> Result<Armies, ReplayError> {
        let map = self.map;
        let rules = self.rules;
        self.ownership.insert(territory, Owner::Neutral);
        let state = self.state_of_mut(order, player)?;
        let armies = state.territories.remove(&territory).unwrap_or(0);
        state.territories_controlled = state.territories_controlled.saturating_sub(1);

        let Some(node) = map.territory(territory) else {
            return Ok(armies);
        };
        for bonus_id in &node.bonus_ids {
            if !state.bonuses.remove(bonus_id) {
                continue;
            }
            if let Some(bonus) = map.bonus(*bonus_id) {
                state.income -= rules.bonus_value(bonus);
            }
        }
        Ok(armies)
    }

    fn current_owner(&self, order: &Order, territory: TerritoryId) -> Result<Owner, ReplayError> {
        self.owner(territory).ok_or(ReplayError::UnknownTerritory {
            turn: order.turn,
            order: Some(order.sequence),
            territory: territory as i64,
        })
    }

    fn expect_owner(&self, order: &Order, territory: TerritoryId, expected: Owner) -> Result<(), ReplayError> {
        let actual = self.current_owner(order, territory)?;
        if actual != expected {
            return Err(ReplayError::OwnershipContradiction {
                turn: order.turn,
                order: order.sequence,
                territory,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn state_mut(&mut self, order: &Order) -> Result<&mut PlayerState, ReplayError> {
        let player = actor(order)?;
        self.state_of_mut(order, player)
    }

    fn state_of_mut(&mut self, order: &Order, player: PlayerId) -> Result<&mut PlayerState, ReplayError> {
        self.players
            .get_mut(player.0 as usize)
            .ok_or_else(|| ReplayError::UnknownPlayer {
                turn: order.turn,
                order: Some(order.sequence),
                player: player.to_string(),
            })
    }
}

/// The acting player; only inert audit records may lack one.
fn actor(order: &Order) -> Result<PlayerId, ReplayError> {
    order.player.ok_or(ReplayError::MissingField {
        turn: order.turn,
        order: Some(order.sequence),
        field: "playerID",
    })
}

/// Remove `armies` from a territory the player holds, refusing to go
/// negative.
fn withdraw(order: &Order, state: &mut PlayerState, territory: TerritoryId, armies: Armies) -> Result<(), ReplayError> {
    let player = state.player;
    let held = state.territories.get_mut(&territory).ok_or(ReplayError::OwnershipContradiction {
        turn: order.turn,
        order: order.sequence,
        territory,
        expected: Owner::Player(player),
        actual: Owner::Neutral,
    })?;
    if *held < armies {
        return Err(ReplayError::ArmyUnderflow {
            turn: order.turn,
            order: order.sequence,
            player,
            territory,
            available: *held,
            requested: armies,
        });
    }
    *held -= armies;
    Ok(())
}
