//! Lattice Transport Layer
//!
//! Runs a CRDT replica over an unreliable datagram channel:
//! - Channel: UDP endpoint plus a fault-injecting wrapper
//! - Handler: applies intents and peer messages to the local CRDT
//! - Replica: registration, receive/broadcast/intent loops, shutdown

pub mod channel;
pub mod error;
pub mod handler;
pub mod lossy;
pub mod replica;

pub use channel::{Channel, UdpChannel};
pub use error::{TransportError, TransportResult};
pub use handler::{Intent, IntentOutcome};
pub use lossy::LossyChannel;
pub use replica::{Phase, Replica, ReplicaConfig, ReplicaEvent, DEFAULT_RENDEZVOUS};
