//! Two-replica grow-only counter

use crate::error::{Error, Result};
use crate::tag::{assign_once, ReplicaId};
use serde::{Deserialize, Serialize};

/// Number of replicas the counter is synchronized between
pub const COUNTER_REPLICAS: usize = 2;

/// Per-replica increment counts, indexed by replica ID
pub type CounterState = [u64; COUNTER_REPLICAS];

/// State-based counter shared by exactly two replicas.
///
/// Each replica is the only writer of its own slot, so merging by
/// pointwise maximum never loses an increment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    node_id: Option<ReplicaId>,
    state: CounterState,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter that already knows its identity
    pub fn with_replica(node_id: ReplicaId) -> Result<Self> {
        let mut counter = Self::new();
        counter.assign_replica(node_id)?;
        Ok(counter)
    }

    /// Counter restored from a known state vector, without an identity
    pub fn from_state(state: CounterState) -> Self {
        Self {
            node_id: None,
            state,
        }
    }

    pub fn replica(&self) -> Option<ReplicaId> {
        self.node_id
    }

    /// Set the identity of this replica; only IDs 0 and 1 are valid
    pub fn assign_replica(&mut self, node_id: ReplicaId) -> Result<bool> {
        if node_id.index() >= COUNTER_REPLICAS {
            return Err(Error::InvalidReplicaId {
                id: node_id,
                max: ReplicaId::new(COUNTER_REPLICAS as u32 - 1),
            });
        }
        assign_once(&mut self.node_id, node_id)
    }

    /// Count one increment by this replica
    pub fn increment(&mut self) -> Result<()> {
        let node_id = self.node_id.ok_or(Error::NotInitialized)?;
        let slot = &mut self.state[node_id.index()];
        *slot = slot
            .checked_add(1)
            .ok_or(Error::CounterOverflow { replica: node_id })?;
        Ok(())
    }

    /// Join with another replica's state vector
    pub fn merge(&mut self, other: &CounterState) {
        for (mine, theirs) in self.state.iter_mut().zip(other.iter()) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// Sum of all slots, saturating at `u64::MAX`
    pub fn value(&self) -> u64 {
        self.state.iter().fold(0u64, |total, n| total.saturating_add(*n))
    }

    pub fn state(&self) -> CounterState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(id: u32) -> Counter {
        Counter::with_replica(ReplicaId::new(id)).unwrap()
    }

    #[test]
    fn test_increment_requires_identity() {
        let mut counter = Counter::new();
        assert_eq!(counter.increment(), Err(Error::NotInitialized));
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_rejects_third_replica() {
        let mut counter = Counter::new();
        assert!(matches!(
            counter.assign_replica(ReplicaId::new(2)),
            Err(Error::InvalidReplicaId { .. })
        ));
        assert_eq!(counter.replica(), None);
    }

    #[test]
    fn test_two_replica_scenario() {
        let mut r0 = replica(0);
        let mut r1 = replica(1);

        r0.increment().unwrap();
        r0.increment().unwrap();
        r1.increment().unwrap();

        assert_eq!(r0.value(), 2);
        assert_eq!(r1.value(), 1);

        let s0 = r0.state();
        let s1 = r1.state();
        r0.merge(&s1);
        r1.merge(&s0);

        assert_eq!(r0.value(), 3);
        assert_eq!(r1.value(), 3);
        assert_eq!(r0.state(), [2, 1]);
        assert_eq!(r1.state(), [2, 1]);
    }

    #[test]
    fn test_merge_with_zero_vector_is_identity() {
        let mut counter = replica(1);
        counter.increment().unwrap();
        counter.merge(&[0, 0]);
        assert_eq!(counter.state(), [0, 1]);
    }

    #[test]
    fn test_stale_merge_never_decreases() {
        let mut counter = Counter::from_state([5, 4]);
        counter.merge(&[3, 7]);
        assert_eq!(counter.state(), [5, 7]);
    }

    #[test]
    fn test_saturated_state_does_not_overflow() {
        let mut counter = replica(0);
        counter.merge(&[u64::MAX, 1]);
        assert_eq!(counter.value(), u64::MAX);

        assert_eq!(
            counter.increment(),
            Err(Error::CounterOverflow {
                replica: ReplicaId::new(0)
            })
        );
        assert_eq!(counter.state(), [u64::MAX, 1]);
    }
}
