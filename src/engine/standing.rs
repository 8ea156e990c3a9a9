//! Authoritative ownership snapshots ("standings") from the feed.
//!
//! The distribution standing is the board before picks; `standing0` is the
//! board after picks; `standing(k+1)` is the board after turn k.

use std::collections::BTreeMap;

use crate::engine::error::ReplayError;
use crate::engine::models::{Armies, PlayerId, PlayerRegistry, TerritoryBaseline, TerritoryId, TurnNumber};
use crate::feed::FeedTerritoryStanding;
use crate::topology::{MapTopology, TemplateRules};

pub const NEUTRAL: &str = "Neutral";
pub const AVAILABLE_FOR_DISTRIBUTION: &str = "AvailableForDistribution";
pub const FOGGED: &str = "Fogged";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandingOwner {
    Neutral,
    AvailableForDistribution,
    Fogged,
    Player(PlayerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandingEntry {
    pub owner: StandingOwner,
    pub armies: Armies,
}

/// Territory id -> owner and army count, as reported by the service.
pub type Standing = BTreeMap<TerritoryId, StandingEntry>;

/// Resolve a raw standing's owners and territory ids. `turn` is the turn
/// the standing closes and is only used for error context.
pub fn resolve_standing(
    raw: &[FeedTerritoryStanding],
    map: &MapTopology,
    players: &PlayerRegistry,
    turn: TurnNumber,
) -> Result<Standing, ReplayError> {
    let mut standing = Standing::new();
    for node in raw {
        if map.territory(node.terr_id).is_none() {
            return Err(ReplayError::UnknownTerritory {
                turn,
                order: None,
                territory: node.terr_id as i64,
            });
        }
        let owner = match node.owned_by.as_str() {
            NEUTRAL => StandingOwner::Neutral,
            AVAILABLE_FOR_DISTRIBUTION => StandingOwner::AvailableForDistribution,
            FOGGED => StandingOwner::Fogged,
            api_id => StandingOwner::Player(players.resolve(api_id).ok_or_else(|| {
                ReplayError::UnknownPlayer {
                    turn,
                    order: None,
                    player: api_id.to_string(),
                }
            })?),
        };
        standing.insert(
            node.terr_id,
            StandingEntry {
                owner,
                armies: node.armies,
            },
        );
    }
    Ok(standing)
}

/// Classify every map territory from the distribution standing.
///
/// Distributable territories are in-distribution; a neutral territory
/// holding exactly the wasteland garrison (on templates with wastelands) is
/// a wasteland; every other territory is out-of-distribution.
pub fn classify_baseline(
    distribution: &Standing,
    map: &MapTopology,
    rules: &TemplateRules,
) -> BTreeMap<TerritoryId, TerritoryBaseline> {
    map.territories
        .keys()
        .map(|&id| {
            let baseline = match distribution.get(&id) {
                Some(entry) if entry.owner == StandingOwner::AvailableForDistribution => {
                    TerritoryBaseline::InDistribution
                }
                Some(entry)
                    if entry.owner == StandingOwner::Neutral
                        && rules.wasteland_count > 0
                        && entry.armies == rules.wasteland_size =>
                {
                    TerritoryBaseline::Wasteland
                }
                _ => TerritoryBaseline::OutOfDistribution,
            };
            (id, baseline)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::topology::{IdKeying, Territory};

    fn map() -> MapTopology {
        MapTopology {
            map_id: 1,
            name: "m".into(),
            keying: IdKeying::Feed,
            territories: (1..=4)
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
                .collect(),
            bonuses: BTreeMap::new(),
        }
    }

    fn raw(terr_id: u32, owned_by: &str, armies: i32) -> FeedTerritoryStanding {
        FeedTerritoryStanding {
            terr_id,
            owned_by: owned_by.into(),
            armies,
        }
    }

    #[test]
    fn test_resolve_owners() {
        let mut players = PlayerRegistry::new();
        let p = players.register("9910002200", "100022", "alice", "Won");
        let standing = resolve_standing(
            &[raw(1, "Neutral", 2), raw(2, "100022", 4), raw(3, "Fogged", 0)],
            &map(),
            &players,
            0,
        )
        .unwrap();
        assert_eq!(standing[&1].owner, StandingOwner::Neutral);
        assert_eq!(standing[&2], StandingEntry { owner: StandingOwner::Player(p), armies: 4 });
        assert_eq!(standing[&3].owner, StandingOwner::Fogged);
    }

    #[test]
    fn test_resolve_rejects_unknown_references() {
        let players = PlayerRegistry::new();
        assert!(matches!(
            resolve_standing(&[raw(9, "Neutral", 2)], &map(), &players, 3),
            Err(ReplayError::UnknownTerritory { turn: 3, territory: 9, .. })
        ));
        assert!(matches!(
            resolve_standing(&[raw(1, "424242", 2)], &map(), &players, 3),
            Err(ReplayError::UnknownPlayer { turn: 3, .. })
        ));
    }

    #[test]
    fn test_classify_baseline() {
        let rules = TemplateRules {
            wasteland_count: 1,
            wasteland_size: 10,
            ..TemplateRules::default()
        };
        let players = PlayerRegistry::new();
        let distribution = resolve_standing(
            &[
                raw(1, "AvailableForDistribution", 4),
                raw(2, "Neutral", 10),
                raw(3, "Neutral", 2),
            ],
            &map(),
            &players,
            -2,
        )
        .unwrap();
        let baseline = classify_baseline(&distribution, &map(), &rules);
        assert_eq!(baseline[&1], TerritoryBaseline::InDistribution);
        assert_eq!(baseline[&2], TerritoryBaseline::Wasteland);
        assert_eq!(baseline[&3], TerritoryBaseline::OutOfDistribution);
        // Absent from the standing: out-of-distribution default.
        assert_eq!(baseline[&4], TerritoryBaseline::OutOfDistribution);

        let no_wastelands = classify_baseline(&distribution, &map(), &TemplateRules::default());
        assert_eq!(no_wastelands[&2], TerritoryBaseline::OutOfDistribution);
    }
}
