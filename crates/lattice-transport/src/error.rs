//! Transport error types

use lattice_core::CrdtKind;
use lattice_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while moving datagrams or applying them
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Channel error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] ProtocolError),

    #[error("CRDT error: {0}")]
    Core(#[from] lattice_core::Error),

    #[error("Replica is not registered yet")]
    NotRegistered,

    #[error("No peers to send to")]
    NoPeers,

    #[error("Datagram too large: {size} > {max}")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("{intent} is not supported by a {kind} replica")]
    Unsupported { intent: &'static str, kind: CrdtKind },

    #[error("Unexpected {message} message for a {kind} replica")]
    Unexpected { message: &'static str, kind: CrdtKind },

    #[error("Could not resolve peer address {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("Replica is shutting down")]
    Shutdown,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
