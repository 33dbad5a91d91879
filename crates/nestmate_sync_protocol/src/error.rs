//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing or encoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Entity type tag outside the closed set.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Operation tag outside the closed set.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Conflict policy name not recognised.
    #[error("unknown conflict policy: {0}")]
    UnknownPolicy(String),

    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed or the data is structurally invalid.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}
