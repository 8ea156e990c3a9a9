//! Distribution-turn pick resolution.
//!
//! The feed's `picks` node lists what each player asked for, not what they
//! were granted. Grants are read off the post-pick standing: a requested
//! territory the player ends up holding is a successful pick, any other
//! request failed, and territories the player holds without having asked
//! for them were assigned by the server (auto-picks).

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::engine::error::ReplayError;
use crate::engine::models::*;
use crate::engine::standing::{Standing, StandingOwner};
use crate::feed::{value_as_i64, PICKS_PLAYER_PREFIX};
use crate::topology::MapTopology;

/// One player's requested picks, in the order they were ranked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickRequest {
    pub player: PlayerId,
    pub territories: Vec<TerritoryId>,
}

/// Decode the `picks` node. Requests come back in participant order.
pub fn pick_requests(
    picks: &BTreeMap<String, Vec<Value>>,
    map: &MapTopology,
    players: &PlayerRegistry,
) -> Result<Vec<PickRequest>, ReplayError> {
    let mut requests = Vec::with_capacity(picks.len());
    for (key, ids) in picks {
        let api_id = key.strip_prefix(PICKS_PLAYER_PREFIX).unwrap_or(key);
        let player = players.resolve(api_id).ok_or_else(|| ReplayError::UnknownPlayer {
            turn: PICK_TURN,
            order: None,
            player: api_id.to_string(),
        })?;
        let territories = ids
            .iter()
            .map(|value| {
                let raw = value_as_i64(value).ok_or_else(|| ReplayError::MalformedField {
                    turn: PICK_TURN,
                    order: None,
                    field: "picks",
                    value: value.to_string(),
                })?;
                TerritoryId::try_from(raw)
                    .ok()
                    .filter(|id| map.territory(*id).is_some())
                    .ok_or(ReplayError::UnknownTerritory {
                        turn: PICK_TURN,
                        order: None,
                        territory: raw,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        requests.push(PickRequest { player, territories });
    }
    requests.sort_by_key(|r| r.player);
    Ok(requests)
}

/// Territories the post-pick standing attributes to each player, minus
/// those that were neutral before distribution.
pub fn granted_territories(distribution: &Standing, after_picks: &Standing) -> BTreeMap<PlayerId, BTreeSet<TerritoryId>> {
    let mut granted: BTreeMap<PlayerId, BTreeSet<TerritoryId>> = BTreeMap::new();
    for (&territory, entry) in after_picks {
        let StandingOwner::Player(player) = entry.owner else {
            continue;
        };
        let was_neutral = distribution
            .get(&territory)
            .is_some_and(|before| before.owner == StandingOwner::Neutral);
        if !was_neutral {
            granted.entry(player).or_default().insert(territory);
        }
    }
    granted
}

/// Build the pick turn's order list: every request as a `Pick` (in request
/// order, players in participant order), then one `AutoPick` per granted
/// territory nobody asked for (players in participant order, ascending
/// territory id). The turn closes with a zero-army `Deploy` per granted
/// player on their lowest territory; starting armies arrive with ownership.
pub fn resolve_picks(requests: &[PickRequest], distribution: &Standing, after_picks: &Standing) -> Vec<Order> {
    let mut granted = granted_territories(distribution, after_picks);
    let placements: Vec<(PlayerId, TerritoryId)> = granted
        .iter()
        .filter_map(|(&player, territories)| Some((player, *territories.first()?)))
        .collect();
    let mut orders = Vec::new();
    let mut sequence = 0u32;

    for request in requests {
        for &territory in &request.territories {
            // Membership-tested removal: a request succeeds at most once.
            let success = granted
                .get_mut(&request.player)
                .is_some_and(|set| set.remove(&territory));
            orders.push(Order {
                player: Some(request.player),
                turn: PICK_TURN,
                sequence,
                kind: OrderKind::Pick { territory, success },
            });
            sequence += 1;
        }
    }

    let mut auto_picks = 0usize;
    for (player, leftovers) in granted {
        for territory in leftovers {
            orders.push(Order {
                player: Some(player),
                turn: PICK_TURN,
                sequence,
                kind: OrderKind::AutoPick { territory },
            });
            sequence += 1;
            auto_picks += 1;
        }
    }
    tracing::debug!(picks = orders.len() - auto_picks, auto_picks, "resolved distribution picks");

    for (player, territory) in placements {
        orders.push(Order {
            player: Some(player),
            turn: PICK_TURN,
            sequence,
            kind: OrderKind::Deploy { territory, armies: 0 },
        });
        sequence += 1;
    }
    orders
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::standing::StandingEntry;

    const P0: PlayerId = PlayerId(0);
    const P1: PlayerId = PlayerId(1);

    fn standing(entries: &[(TerritoryId, StandingOwner)]) -> Standing {
        entries
            .iter()
            .map(|&(id, owner)| (id, StandingEntry { owner, armies: 2 }))
            .collect()
    }

    fn gains(orders: &[Order]) -> Vec<(PlayerId, TerritoryId)> {
        orders
            .iter()
            .filter_map(|o| match o.kind {
                OrderKind::Pick { territory, success: true } | OrderKind::AutoPick { territory } => {
                    Some((o.player?, territory))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_contested_pick_goes_to_one_player() {
        use StandingOwner::*;
        let distribution = standing(&[(1, AvailableForDistribution), (2, AvailableForDistribution), (3, Neutral)]);
        let after = standing(&[(1, Player(P0)), (2, Player(P1)), (3, Neutral)]);
        let requests = vec![
            PickRequest { player: P0, territories: vec![1, 2] },
            PickRequest { player: P1, territories: vec![1, 2] },
        ];
        let orders = resolve_picks(&requests, &distribution, &after);

        let outcomes: Vec<_> = orders
            .iter()
            .map(|o| (o.player.unwrap(), o.sequence, o.kind.clone()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (P0, 0, OrderKind::Pick { territory: 1, success: true }),
                (P0, 1, OrderKind::Pick { territory: 2, success: false }),
                (P1, 2, OrderKind::Pick { territory: 1, success: false }),
                (P1, 3, OrderKind::Pick { territory: 2, success: true }),
                (P0, 4, OrderKind::Deploy { territory: 1, armies: 0 }),
                (P1, 5, OrderKind::Deploy { territory: 2, armies: 0 }),
            ]
        );
        assert!(orders.iter().all(|o| o.turn == PICK_TURN));
    }

    #[test]
    fn test_unrequested_grants_become_auto_picks() {
        use StandingOwner::*;
        let distribution = standing(&[
            (1, AvailableForDistribution),
            (2, AvailableForDistribution),
            (4, AvailableForDistribution),
        ]);
        let after = standing(&[(1, Player(P0)), (2, Player(P1)), (4, Player(P0))]);
        let requests = vec![PickRequest { player: P0, territories: vec![1] }];
        let orders = resolve_picks(&requests, &distribution, &after);

        assert_eq!(gains(&orders), vec![(P0, 1), (P0, 4), (P1, 2)]);
        assert!(matches!(orders[1].kind, OrderKind::AutoPick { territory: 4 }));
        assert_eq!(orders[2].sequence, 2);
    }

    #[test]
    fn test_duplicate_requests_credit_once() {
        use StandingOwner::*;
        let distribution = standing(&[(1, AvailableForDistribution)]);
        let after = standing(&[(1, Player(P0))]);
        let requests = vec![PickRequest { player: P0, territories: vec![1, 1, 1] }];
        let orders = resolve_picks(&requests, &distribution, &after);
        assert_eq!(gains(&orders), vec![(P0, 1)]);
        assert_eq!(orders.len(), 4);
    }

    #[test]
    fn test_pick_turn_closes_with_empty_deployments() {
        use StandingOwner::*;
        let distribution = standing(&[(1, AvailableForDistribution), (2, AvailableForDistribution), (3, Neutral)]);
        let after = standing(&[(1, Player(P1)), (2, Player(P1)), (3, Neutral)]);
        let requests = vec![
            PickRequest { player: P0, territories: vec![2] },
            PickRequest { player: P1, territories: vec![2] },
        ];
        let orders = resolve_picks(&requests, &distribution, &after);

        let deployments: Vec<_> = orders
            .iter()
            .filter(|o| matches!(o.kind, OrderKind::Deploy { .. }))
            .map(|o| (o.player.unwrap(), o.sequence, o.kind.clone()))
            .collect();
        // P0 was granted nothing and gets no placement.
        assert_eq!(deployments, vec![(P1, 3, OrderKind::Deploy { territory: 1, armies: 0 })]);
        assert_eq!(orders.last().map(|o| o.sequence), Some(3));
    }

    #[test]
    fn test_baseline_neutrals_are_not_grants() {
        use StandingOwner::*;
        // A territory that was already neutral before distribution is never
        // credited by the pick turn, even when the post-pick standing names a
        // player on it.
        let distribution = standing(&[(1, Neutral), (2, AvailableForDistribution)]);
        let after = standing(&[(1, Player(P0)), (2, Player(P0))]);
        let granted = granted_territories(&distribution, &after);
        assert_eq!(granted[&P0], BTreeSet::from([2]));
    }

    #[test]
    fn test_pick_requests_decoding() {
        use std::collections::BTreeSet as Set;

        use crate::topology::{IdKeying, Territory};

        let map = MapTopology {
            map_id: 1,
            name: "m".into(),
            keying: IdKeying::Feed,
            territories: (1..=3)
                .map(|id| {
                    (
                        id,
                        Territory { id, name: String::new(), connected: Set::new(), bonus_ids: Set::new() },
                    )
                })
                .collect(),
            bonuses: BTreeMap::new(),
        };
        let mut players = PlayerRegistry::new();
        players.register("9910002200", "100022", "alice", "Won");
        players.register("9920003300", "200033", "bob", "Eliminated");

        let picks = BTreeMap::from([
            ("player_200033".to_string(), vec![serde_json::json!("3"), serde_json::json!(1)]),
            ("player_100022".to_string(), vec![serde_json::json!(2)]),
        ]);
        let requests = pick_requests(&picks, &map, &players).unwrap();
        assert_eq!(
            requests,
            vec![
                PickRequest { player: P0, territories: vec![2] },
                PickRequest { player: P1, territories: vec![3, 1] },
            ]
        );

        let bad = BTreeMap::from([("player_100022".to_string(), vec![serde_json::json!(9)])]);
        assert!(matches!(
            pick_requests(&bad, &map, &players),
            Err(ReplayError::UnknownTerritory { turn: PICK_TURN, territory: 9, .. })
        ));
        let stranger = BTreeMap::from([("player_555555".to_string(), vec![])]);
        assert!(matches!(
            pick_requests(&stranger, &map, &players),
            Err(ReplayError::UnknownPlayer { .. })
        ));
    }
}
