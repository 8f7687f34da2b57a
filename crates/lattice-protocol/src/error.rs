//! Protocol error types

use thiserror::Error;

/// Reasons an inbound datagram cannot be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty message")]
    Empty,

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Invalid escape sequence in: {0}")]
    InvalidEscape(String),

    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
