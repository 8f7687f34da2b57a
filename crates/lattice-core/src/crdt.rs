//! CRDT kinds and the replica-owned instance

use crate::counter::{Counter, CounterState};
use crate::error::{Error, Result};
use crate::op_orset::OpOrSet;
use crate::state_orset::StateOrSet;
use crate::tag::ReplicaId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which replicated data type a replica runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrdtKind {
    /// Two-replica counter, state-based
    Counter,
    /// OR-Set replicated by full-state exchange
    StateSet,
    /// OR-Set replicated by operations
    OpSet,
}

impl Default for CrdtKind {
    fn default() -> Self {
        Self::Counter
    }
}

impl std::fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrdtKind::Counter => write!(f, "counter"),
            CrdtKind::StateSet => write!(f, "state-set"),
            CrdtKind::OpSet => write!(f, "op-set"),
        }
    }
}

impl std::str::FromStr for CrdtKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "counter" | "crdt-counter" => Ok(CrdtKind::Counter),
            "state-set" | "state" | "state-orset" => Ok(CrdtKind::StateSet),
            "op-set" | "op" | "op-orset" => Ok(CrdtKind::OpSet),
            _ => Err(Error::UnknownKind(s.to_string())),
        }
    }
}

/// The CRDT instance a replica owns
#[derive(Debug, Clone)]
pub enum Crdt {
    Counter(Counter),
    StateSet(StateOrSet),
    OpSet(OpOrSet),
}

impl Crdt {
    pub fn new(kind: CrdtKind) -> Self {
        match kind {
            CrdtKind::Counter => Crdt::Counter(Counter::new()),
            CrdtKind::StateSet => Crdt::StateSet(StateOrSet::new()),
            CrdtKind::OpSet => Crdt::OpSet(OpOrSet::new()),
        }
    }

    pub fn kind(&self) -> CrdtKind {
        match self {
            Crdt::Counter(_) => CrdtKind::Counter,
            Crdt::StateSet(_) => CrdtKind::StateSet,
            Crdt::OpSet(_) => CrdtKind::OpSet,
        }
    }

    pub fn replica(&self) -> Option<ReplicaId> {
        match self {
            Crdt::Counter(c) => c.replica(),
            Crdt::StateSet(s) => s.replica(),
            Crdt::OpSet(s) => s.replica(),
        }
    }

    pub fn assign_replica(&mut self, replica: ReplicaId) -> Result<bool> {
        match self {
            Crdt::Counter(c) => c.assign_replica(replica),
            Crdt::StateSet(s) => s.assign_replica(replica),
            Crdt::OpSet(s) => s.assign_replica(replica),
        }
    }

    /// Consistent read of the displayed value
    pub fn snapshot(&self) -> Snapshot {
        match self {
            Crdt::Counter(c) => Snapshot::Counter {
                state: c.state(),
                value: c.value(),
            },
            Crdt::StateSet(s) => Snapshot::Set {
                elements: s.value(),
            },
            Crdt::OpSet(s) => Snapshot::Set {
                elements: s.value(),
            },
        }
    }
}

/// Point-in-time view of a replica's value, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Snapshot {
    Counter { state: CounterState, value: u64 },
    Set { elements: BTreeSet<String> },
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Snapshot::Counter { state, value } => {
                write!(f, "Current value: {} ({},{})", value, state[0], state[1])
            }
            Snapshot::Set { elements } => {
                let items: Vec<&str> = elements.iter().map(String::as_str).collect();
                write!(f, "Current State: {{{}}}", items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("counter".parse::<CrdtKind>().unwrap(), CrdtKind::Counter);
        assert_eq!("State-Set".parse::<CrdtKind>().unwrap(), CrdtKind::StateSet);
        assert_eq!("op".parse::<CrdtKind>().unwrap(), CrdtKind::OpSet);
        assert!("lww".parse::<CrdtKind>().is_err());
    }

    #[test]
    fn test_kind_display_round_trips() {
        for kind in [CrdtKind::Counter, CrdtKind::StateSet, CrdtKind::OpSet] {
            assert_eq!(kind.to_string().parse::<CrdtKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_assign_replica_dispatches() {
        let mut crdt = Crdt::new(CrdtKind::OpSet);
        assert_eq!(crdt.replica(), None);
        assert!(crdt.assign_replica(ReplicaId::new(7)).unwrap());
        assert_eq!(crdt.replica(), Some(ReplicaId::new(7)));

        let mut counter = Crdt::new(CrdtKind::Counter);
        assert!(counter.assign_replica(ReplicaId::new(7)).is_err());
    }

    #[test]
    fn test_snapshot_rendering() {
        let counter = Snapshot::Counter {
            state: [2, 1],
            value: 3,
        };
        assert_eq!(counter.to_string(), "Current value: 3 (2,1)");

        let set = Snapshot::Set {
            elements: ["b", "a"].iter().map(|s| s.to_string()).collect(),
        };
        assert_eq!(set.to_string(), "Current State: {a, b}");
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = Crdt::new(CrdtKind::StateSet).snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "set");
        assert!(json["elements"].as_array().unwrap().is_empty());
    }
}
