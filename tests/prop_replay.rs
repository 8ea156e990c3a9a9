//! Property-based tests for the replay engine.
//!
//! Random but internally consistent order streams are generated against a
//! live engine, then replayed turn by turn and checked for board
//! invariants.
//! Run with: cargo test --release prop_replay

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use ladder_replay::engine::models::*;
use ladder_replay::engine::replay::ReplayEngine;
use ladder_replay::topology::{BonusRegion, IdKeying, MapTopology, TemplateRules, Territory};

const TERRITORIES: u32 = 6;

fn map() -> MapTopology {
    let bonuses = [(100, 2, vec![1, 4]), (200, 2, vec![3, 6]), (300, 1, vec![2, 5]), (400, 4, vec![1, 2, 3])];
    let mut territories: BTreeMap<TerritoryId, Territory> = (1..=TERRITORIES)
        .map(|id| {
            (
                id,
                Territory {
                    id,
                    name: format!("T{id}"),
                    connected: BTreeSet::new(),
                    bonus_ids: BTreeSet::new(),
                },
            )
        })
        .collect();
    let mut regions = BTreeMap::new();
    for (id, value, members) in bonuses {
        for t in &members {
            if let Some(territory) = territories.get_mut(t) {
                territory.bonus_ids.insert(id);
            }
        }
        regions.insert(
            id,
            BonusRegion {
                id,
                name: format!("B{id}"),
                base_value: value,
                territory_ids: members.into_iter().collect(),
            },
        );
    }
    MapTopology {
        map_id: 1,
        name: "prop".into(),
        keying: IdKeying::Feed,
        territories,
        bonuses: regions,
    }
}

fn rules() -> TemplateRules {
    TemplateRules {
        map_id: 1,
        overridden_bonuses: BTreeMap::from([(300, 5)]),
        ..TemplateRules::default()
    }
}

fn registry() -> PlayerRegistry {
    let mut registry = PlayerRegistry::new();
    registry.register("9910002200", "100022", "one", "Won");
    registry.register("9920003300", "200033", "two", "Eliminated");
    registry
}

/// Raw choices, interpreted against the live board when the order is built.
#[derive(Debug, Clone)]
struct Op {
    player: u32,
    kind: u8,
    pick: u8,
    target: u8,
    amount: u8,
    losses: u8,
    success: bool,
}

fn op() -> impl Strategy<Value = Op> {
    (0u32..2, 0u8..6, any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>(), any::<bool>()).prop_map(
        |(player, kind, pick, target, amount, losses, success)| Op {
            player,
            kind,
            pick,
            target,
            amount,
            losses,
            success,
        },
    )
}

fn outcome(is_attack: bool, is_successful: bool, committed: Armies, attacker: Armies, defender: Armies) -> AttackOutcome {
    AttackOutcome {
        is_attack,
        is_successful,
        committed,
        attacker_losses: attacker,
        defender_losses: defender,
        offense_luck: 0.0,
        defense_luck: 0.0,
    }
}

fn attack_transfer(from: TerritoryId, to: TerritoryId, outcome: AttackOutcome) -> OrderKind {
    OrderKind::AttackTransfer {
        from,
        to,
        requested: outcome.committed,
        by_percent: false,
        attack_teammates: false,
        mode: AttackTransferMode::AttackTransfer,
        outcome,
    }
}

/// Build an order that is valid on the engine's current board, if any.
fn build(engine: &ReplayEngine<'_>, op: &Op, turn: TurnNumber, sequence: u32) -> Option<Order> {
    let player = PlayerId(op.player);
    let state = engine.player(player)?;
    let owned: Vec<(TerritoryId, Armies)> = state.territories.iter().map(|(&t, &a)| (t, a)).collect();
    if owned.is_empty() {
        return None;
    }
    let (source, armies) = owned[op.pick as usize % owned.len()];
    let kind = match op.kind {
        0 => OrderKind::Deploy {
            territory: source,
            armies: (op.amount % 10) as Armies,
        },
        1 | 2 => {
            let targets: Vec<TerritoryId> = (1..=TERRITORIES).filter(|t| !state.owns(*t)).collect();
            if targets.is_empty() || armies == 0 {
                return None;
            }
            let target = targets[op.target as usize % targets.len()];
            let committed = 1 + (op.amount as Armies % armies);
            let attacker_losses = op.losses as Armies % (committed + 1);
            let garrison = match engine.owner(target)? {
                Owner::Neutral => engine.neutral_armies(target).unwrap_or(0),
                Owner::Player(p) => engine.player(p)?.territories.get(&target).copied().unwrap_or(0),
            };
            let defender_losses = if op.success {
                garrison
            } else {
                op.losses as Armies % (garrison + 1)
            };
            attack_transfer(
                source,
                target,
                outcome(true, op.success, committed, attacker_losses, defender_losses),
            )
        }
        3 => {
            let destinations: Vec<TerritoryId> = owned.iter().map(|(t, _)| *t).filter(|t| *t != source).collect();
            if destinations.is_empty() || armies == 0 {
                return None;
            }
            let to = destinations[op.target as usize % destinations.len()];
            let committed = 1 + (op.amount as Armies % armies);
            attack_transfer(source, to, outcome(false, true, committed, 0, 0))
        }
        4 => OrderKind::Blockade { territory: source },
        _ => OrderKind::Unsupported {
            order_type: "GameOrderPlayCardGift".into(),
            actor: None,
        },
    };
    Some(Order { player: Some(player), turn, sequence, kind })
}

/// Generate consistent turns by applying each built order to a scratch
/// engine as it is produced.
fn generate(map: &MapTopology, rules: &TemplateRules, picks: &[u8], turns: &[Vec<Op>]) -> Vec<TurnOrders> {
    let players = registry();
    let mut scratch = ReplayEngine::new(map, rules, &players, &BTreeMap::new());
    let mut out = Vec::with_capacity(turns.len() + 1);

    let pick_orders: Vec<Order> = picks
        .iter()
        .zip(1..=TERRITORIES)
        .filter(|(owner, _)| **owner < 2)
        .enumerate()
        .map(|(sequence, (owner, territory))| Order {
            player: Some(PlayerId(*owner as u32)),
            turn: PICK_TURN,
            sequence: sequence as u32,
            kind: OrderKind::Pick { territory, success: true },
        })
        .collect();
    let pick_turn = TurnOrders { turn: PICK_TURN, committed_at: None, orders: pick_orders };
    scratch.apply_turn(&pick_turn).unwrap();
    out.push(pick_turn);

    for (index, ops) in turns.iter().enumerate() {
        let turn = index as TurnNumber;
        let mut orders = Vec::new();
        for op in ops {
            if let Some(order) = build(&scratch, op, turn, orders.len() as u32) {
                scratch.apply(&order).unwrap();
                orders.push(order);
            }
        }
        out.push(TurnOrders { turn, committed_at: None, orders });
    }
    out
}

fn replay(map: &MapTopology, rules: &TemplateRules, turns: &[TurnOrders]) -> Vec<TurnSnapshot> {
    let players = registry();
    let mut engine = ReplayEngine::new(map, rules, &players, &BTreeMap::new());
    turns.iter().map(|t| engine.apply_turn(t).unwrap()).collect()
}

fn check_snapshot(map: &MapTopology, rules: &TemplateRules, snapshot: &TurnSnapshot) -> Result<(), TestCaseError> {
    let controlled: u32 = snapshot.players.iter().map(|p| p.territories_controlled).sum();
    prop_assert_eq!(controlled as usize + snapshot.neutral_count(), map.territory_count());
    prop_assert_eq!(snapshot.ownership.len(), map.territory_count());

    for state in &snapshot.players {
        prop_assert_eq!(state.territories_controlled as usize, state.territories.len());
        prop_assert_eq!(state.armies_on_board, state.territories.values().sum::<Armies>());

        let mut income = rules.base_income;
        for (id, bonus) in &map.bonuses {
            let complete = bonus.territory_ids.iter().all(|t| state.territories.contains_key(t));
            prop_assert_eq!(complete, state.bonuses.contains(id), "bonus {} for {}", id, state.player);
            if complete {
                income += rules.bonus_value(bonus);
            }
        }
        prop_assert_eq!(state.income, income);

        for territory in state.territories.keys() {
            prop_assert_eq!(snapshot.ownership[territory], Owner::Player(state.player));
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Territory conservation, bonus consistency and army bookkeeping hold
    /// after every turn.
    #[test]
    fn prop_board_invariants(
        picks in prop::collection::vec(0u8..3, TERRITORIES as usize),
        turns in prop::collection::vec(prop::collection::vec(op(), 0..12), 1..8)
    ) {
        let (map, rules) = (map(), rules());
        let orders = generate(&map, &rules, &picks, &turns);
        for snapshot in replay(&map, &rules, &orders) {
            check_snapshot(&map, &rules, &snapshot)?;
        }
    }

    /// The same order stream always produces the same serialised snapshots.
    #[test]
    fn prop_replay_deterministic(
        picks in prop::collection::vec(0u8..3, TERRITORIES as usize),
        turns in prop::collection::vec(prop::collection::vec(op(), 0..12), 1..6)
    ) {
        let (map, rules) = (map(), rules());
        let orders = generate(&map, &rules, &picks, &turns);
        let first = serde_json::to_string(&replay(&map, &rules, &orders)).unwrap();
        let second = serde_json::to_string(&replay(&map, &rules, &orders)).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Every territory the post-pick board attributes to a player comes from
    /// exactly one gain event.
    #[test]
    fn prop_pick_resolution_complete(
        requested in prop::collection::vec(prop::collection::vec(1u32..=TERRITORIES, 0..5), 2),
        granted in prop::collection::vec(0u8..3, TERRITORIES as usize)
    ) {
        use ladder_replay::engine::picks::{resolve_picks, PickRequest};
        use ladder_replay::engine::standing::{Standing, StandingEntry, StandingOwner};

        let distribution: Standing = (1..=TERRITORIES)
            .map(|t| (t, StandingEntry { owner: StandingOwner::AvailableForDistribution, armies: 4 }))
            .collect();
        let after: Standing = granted
            .iter()
            .zip(1..=TERRITORIES)
            .map(|(owner, t)| {
                let owner = match owner {
                    0 | 1 => StandingOwner::Player(PlayerId(*owner as u32)),
                    _ => StandingOwner::Neutral,
                };
                (t, StandingEntry { owner, armies: 4 })
            })
            .collect();
        let requests: Vec<PickRequest> = requested
            .into_iter()
            .enumerate()
            .map(|(p, territories)| PickRequest { player: PlayerId(p as u32), territories })
            .collect();

        let orders = resolve_picks(&requests, &distribution, &after);
        let mut gains: Vec<(TerritoryId, PlayerId)> = orders
            .iter()
            .filter_map(|o| match o.kind {
                OrderKind::Pick { territory, success: true } | OrderKind::AutoPick { territory } => Some((territory, o.player?)),
                _ => None,
            })
            .collect();
        gains.sort();
        let mut expected: Vec<(TerritoryId, PlayerId)> = after
            .iter()
            .filter_map(|(&t, e)| match e.owner {
                StandingOwner::Player(p) => Some((t, p)),
                _ => None,
            })
            .collect();
        expected.sort();
        prop_assert_eq!(gains, expected);
    }
}
