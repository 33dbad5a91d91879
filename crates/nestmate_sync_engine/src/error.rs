//! Error types for the sync engine.

use crate::store::StoreError;
use nestmate_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Every error is scoped to one user's one session; none is fatal to the
/// process.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A queued change was malformed and nothing from its batch was appended.
    #[error("invalid change at index {index}: {reason}")]
    InvalidChange {
        /// Position of the offending record in the submitted batch.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A session (or manual resolution) is already running for the user.
    #[error("sync already in progress for user {user_id}")]
    SyncAlreadyInProgress {
        /// The contended user.
        user_id: String,
    },

    /// The remote side could not be reached.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A store rejected a write on optimistic concurrency.
    #[error("version conflict on entity {entity_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Entity ID.
        entity_id: String,
        /// Version the write expected.
        expected: u64,
        /// Version the store holds.
        actual: u64,
    },

    /// The session completed but some entities were unresolved or unapplied.
    #[error("sync completed with {} failed entities: {}", entity_ids.len(), entity_ids.join(", "))]
    PartialFailure {
        /// Every affected entity.
        entity_ids: Vec<String>,
    },

    /// A manual resolution named an entity that is not an open conflict.
    #[error("entity {entity_id} is not in conflict")]
    EntityNotInConflict {
        /// Entity ID.
        entity_id: String,
    },

    /// The caller cancelled the session or its deadline passed.
    #[error("sync cancelled")]
    Cancelled,

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invalid change error.
    pub fn invalid_change(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidChange {
            index,
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Codec(err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict {
                entity_id,
                expected,
                actual,
            } => SyncError::VersionConflict {
                entity_id,
                expected,
                actual,
            },
            StoreError::Unavailable(message) => SyncError::transport_retryable(message),
        }
    }
}
