//! Lattice Core - replicated data types
//!
//! This crate provides the CRDTs exchanged between Lattice Gym replicas:
//! - Causal tags unique per replica and add
//! - A two-replica counter merged by pointwise maximum
//! - Observed-remove sets, replicated by state or by operation

pub mod counter;
pub mod crdt;
pub mod error;
pub mod op_orset;
pub mod orset;
pub mod state_orset;
pub mod tag;

pub use counter::{Counter, CounterState, COUNTER_REPLICAS};
pub use crdt::{Crdt, CrdtKind, Snapshot};
pub use error::{Error, Result};
pub use op_orset::{OpKind, OpOrSet, Operation};
pub use orset::{OrSetState, TaggedElement, TaggedSet};
pub use state_orset::StateOrSet;
pub use tag::{ReplicaId, Tag, TagGenerator};
