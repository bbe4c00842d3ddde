//! Capacity-limited facility leases.
//!
//! First acquire wins. There is no queue: an agent that cannot get a seat
//! tries another facility or proceeds without one.

use std::collections::{BTreeMap, BTreeSet};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::random::choose_weighted;
use crate::{Agent, AgentId, EntityId, FacilityId, FacilityKind};

/// Opinion assumed for occupants the agent has no relationship with.
const NEUTRAL_OPINION: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub kind: FacilityKind,
    /// Building housing the facility.
    pub building: EntityId,
    pub capacity: usize,
    pub occupants: BTreeSet<AgentId>,
}

impl Facility {
    pub fn has_room(&self) -> bool {
        self.occupants.len() < self.capacity
    }
}

/// Proof that an agent holds one seat in a facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHandle {
    pub facility: FacilityId,
    pub agent: AgentId,
}

/// Leases held by one task. Almost always zero to two.
pub type LeaseSet = SmallVec<[LeaseHandle; 2]>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacilityDirectory {
    facilities: BTreeMap<FacilityId, Facility>,
}

impl FacilityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, facility: Facility) {
        self.facilities.insert(facility.id.clone(), facility);
    }

    pub fn get(&self, id: &FacilityId) -> Option<&Facility> {
        self.facilities.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Facility> {
        self.facilities.values()
    }

    pub fn occupants(&self, id: &FacilityId) -> usize {
        self.facilities.get(id).map_or(0, |f| f.occupants.len())
    }

    /// Takes a seat. Returns `None` when the facility is full or unknown.
    /// Re-acquiring a seat already held returns the same lease.
    pub fn try_acquire(&mut self, id: &FacilityId, agent: &AgentId) -> Option<LeaseHandle> {
        let facility = self.facilities.get_mut(id)?;
        if !facility.occupants.contains(agent) {
            if !facility.has_room() {
                return None;
            }
            facility.occupants.insert(agent.clone());
        }
        Some(LeaseHandle {
            facility: id.clone(),
            agent: agent.clone(),
        })
    }

    /// Frees the seat if it is held. Returns whether anything changed, so a
    /// double release or the release of a never-acquired lease is a no-op.
    pub fn release(&mut self, handle: &LeaseHandle) -> bool {
        self.facilities
            .get_mut(&handle.facility)
            .is_some_and(|f| f.occupants.remove(&handle.agent))
    }

    pub fn holds(&self, handle: &LeaseHandle) -> bool {
        self.facilities
            .get(&handle.facility)
            .is_some_and(|f| f.occupants.contains(&handle.agent))
    }

    /// Drops every seat whose holder fails `keep`. Returns the number of
    /// seats freed.
    pub fn retain_occupants(&mut self, keep: impl Fn(&AgentId) -> bool) -> usize {
        let mut freed = 0;
        for facility in self.facilities.values_mut() {
            let before = facility.occupants.len();
            facility.occupants.retain(&keep);
            freed += before - facility.occupants.len();
        }
        freed
    }

    /// Facilities of `kind` with a free seat, in id order.
    pub fn find_available(&self, kind: FacilityKind) -> Vec<&Facility> {
        self.facilities
            .values()
            .filter(|f| f.kind == kind && f.has_room())
            .collect()
    }
}

/// Keeps only the facilities with the fewest occupants.
pub fn least_crowded<'a>(candidates: &[&'a Facility]) -> Vec<&'a Facility> {
    let Some(min) = candidates.iter().map(|f| f.occupants.len()).min() else {
        return Vec::new();
    };
    candidates
        .iter()
        .copied()
        .filter(|f| f.occupants.len() == min)
        .collect()
}

/// Weights each facility by the agent's average opinion of its occupants.
/// Empty facilities get a neutral weight.
pub fn relationship_weights(agent: &Agent, candidates: &[&Facility]) -> Vec<(FacilityId, f64)> {
    candidates
        .iter()
        .map(|f| {
            let others: Vec<f64> = f
                .occupants
                .iter()
                .filter(|id| **id != agent.id)
                .map(|id| {
                    agent
                        .relationships
                        .get(id)
                        .copied()
                        .unwrap_or(NEUTRAL_OPINION)
                })
                .collect();
            let weight = if others.is_empty() {
                NEUTRAL_OPINION
            } else {
                others.iter().sum::<f64>() / others.len() as f64
            };
            (f.id.clone(), weight.max(1.0))
        })
        .collect()
}

/// Least crowded available facility of `kind`, ties broken by a
/// relationship-weighted random choice.
pub fn select_facility(
    directory: &FacilityDirectory,
    kind: FacilityKind,
    agent: &Agent,
    rng: &mut dyn RngCore,
) -> Option<FacilityId> {
    let available = directory.find_available(kind);
    let candidates = least_crowded(&available);
    let weights = relationship_weights(agent, &candidates);
    choose_weighted(&weights, rng).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office(id: &str, capacity: usize) -> Facility {
        Facility {
            id: FacilityId(id.to_string()),
            kind: FacilityKind::Office,
            building: EntityId("bldg_hab".to_string()),
            capacity,
            occupants: BTreeSet::new(),
        }
    }

    fn agent(id: &str) -> AgentId {
        AgentId(id.to_string())
    }

    #[test]
    fn acquire_rejects_when_full() {
        let mut dir = FacilityDirectory::new();
        dir.insert(office("office_a", 2));
        let id = FacilityId("office_a".to_string());
        assert!(dir.try_acquire(&id, &agent("a")).is_some());
        assert!(dir.try_acquire(&id, &agent("b")).is_some());
        assert!(dir.try_acquire(&id, &agent("c")).is_none());
        assert_eq!(dir.occupants(&id), 2);
    }

    #[test]
    fn reacquire_does_not_double_count() {
        let mut dir = FacilityDirectory::new();
        dir.insert(office("office_a", 2));
        let id = FacilityId("office_a".to_string());
        dir.try_acquire(&id, &agent("a"));
        dir.try_acquire(&id, &agent("a"));
        assert_eq!(dir.occupants(&id), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let mut dir = FacilityDirectory::new();
        dir.insert(office("office_a", 1));
        let id = FacilityId("office_a".to_string());
        let handle = dir.try_acquire(&id, &agent("a")).unwrap();
        assert!(dir.release(&handle));
        assert!(!dir.release(&handle));
        assert_eq!(dir.occupants(&id), 0);

        let never_held = LeaseHandle {
            facility: id.clone(),
            agent: agent("z"),
        };
        assert!(!dir.release(&never_held));
        assert_eq!(dir.occupants(&id), 0);
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let mut dir = FacilityDirectory::new();
        dir.insert(office("office_a", 3));
        let id = FacilityId("office_a".to_string());
        let names = ["a", "b", "c", "d", "e"];
        for round in 0..20 {
            let who = agent(names[round % names.len()]);
            if round % 3 == 0 {
                dir.release(&LeaseHandle {
                    facility: id.clone(),
                    agent: who,
                });
            } else {
                dir.try_acquire(&id, &who);
            }
            assert!(dir.occupants(&id) <= 3);
        }
    }

    #[test]
    fn least_crowded_keeps_minimum() {
        let mut busy = office("office_a", 4);
        busy.occupants.insert(agent("x"));
        let quiet = office("office_b", 4);
        let picked = least_crowded(&[&busy, &quiet]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, FacilityId("office_b".to_string()));
    }
}
