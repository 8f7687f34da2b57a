//! Error types for Lattice Core

use crate::tag::ReplicaId;
use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Replica has no identity yet; wait for registration to complete")]
    NotInitialized,

    #[error("Replica ID {id} is out of range (max {max})")]
    InvalidReplicaId { id: ReplicaId, max: ReplicaId },

    #[error("Replica ID already assigned: {current}, refusing {requested}")]
    ReplicaAlreadyAssigned {
        current: ReplicaId,
        requested: ReplicaId,
    },

    #[error("Counter slot of replica {replica} is saturated")]
    CounterOverflow { replica: ReplicaId },

    #[error("Unknown CRDT kind: {0}")]
    UnknownKind(String),
}

/// Result type alias for Lattice Core operations
pub type Result<T> = std::result::Result<T, Error>;
