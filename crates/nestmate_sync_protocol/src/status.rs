//! Per-user sync status.

use crate::record::EntityType;
use crate::value::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a user's sync session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No session running.
    #[default]
    Idle,
    /// Fetching remote changes since the checkpoint.
    Pulling,
    /// Draining the change log and classifying entities.
    Detecting,
    /// Running the conflict resolver.
    Resolving,
    /// Writing outcomes to both stores.
    Applying,
    /// The last session aborted.
    Failed,
}

impl SyncPhase {
    /// Returns true while a session is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Pulling | SyncPhase::Detecting | SyncPhase::Resolving | SyncPhase::Applying
        )
    }

    /// Returns true if a new session may start from this phase.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncPhase::Idle | SyncPhase::Failed)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Pulling => "pulling",
            SyncPhase::Detecting => "detecting",
            SyncPhase::Resolving => "resolving",
            SyncPhase::Applying => "applying",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A problem recorded in `SyncStatus::errors`.
///
/// Entity-scoped issues carry the entity id and type so they can be
/// re-surfaced to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIssue {
    /// The resolution strategy could not decide.
    UnresolvedConflict {
        /// Entity type.
        entity_type: EntityType,
        /// Entity ID.
        entity_id: String,
        /// Why no decision was made.
        reason: String,
    },
    /// A store rejected a write because the entity moved on.
    VersionConflict {
        /// Entity type.
        entity_type: EntityType,
        /// Entity ID.
        entity_id: String,
        /// Version the write expected.
        expected: u64,
        /// Version the store holds.
        actual: u64,
    },
    /// A store write failed for another reason.
    StoreFailure {
        /// Entity type.
        entity_type: EntityType,
        /// Entity ID.
        entity_id: String,
        /// Failure description.
        message: String,
    },
    /// The remote side could not be reached.
    Transport {
        /// Failure description.
        message: String,
    },
    /// The session was cancelled by the caller.
    Cancelled,
}

impl SyncIssue {
    /// Returns the entity this issue is about, if any.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            SyncIssue::UnresolvedConflict { entity_id, .. }
            | SyncIssue::VersionConflict { entity_id, .. }
            | SyncIssue::StoreFailure { entity_id, .. } => Some(entity_id),
            SyncIssue::Transport { .. } | SyncIssue::Cancelled => None,
        }
    }

    /// Returns true for unresolved conflicts.
    pub fn is_unresolved_conflict(&self) -> bool {
        matches!(self, SyncIssue::UnresolvedConflict { .. })
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncIssue::UnresolvedConflict {
                entity_type,
                entity_id,
                reason,
            } => write!(f, "unresolved conflict on {entity_type} {entity_id}: {reason}"),
            SyncIssue::VersionConflict {
                entity_type,
                entity_id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on {entity_type} {entity_id}: expected {expected}, found {actual}"
            ),
            SyncIssue::StoreFailure {
                entity_type,
                entity_id,
                message,
            } => write!(f, "store failure on {entity_type} {entity_id}: {message}"),
            SyncIssue::Transport { message } => write!(f, "transport error: {message}"),
            SyncIssue::Cancelled => f.write_str("sync cancelled"),
        }
    }
}

/// Counters from the last completed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Remote snapshots pulled.
    pub pulled: u64,
    /// Local change records drained.
    pub drained: u64,
    /// Entities written to the remote store.
    pub pushed: u64,
    /// Entities written to the local store.
    pub applied_locally: u64,
    /// Conflicts detected.
    pub conflicts: u64,
    /// Conflicts resolved automatically.
    pub resolved: u64,
}

/// Snapshot of one user's sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// When the last session completed, if ever.
    pub last_sync_time: Option<Timestamp>,
    /// Change records waiting in the change log.
    pub pending_changes: usize,
    /// Whether a session is running.
    pub sync_in_progress: bool,
    /// Issues from the most recent session, in order of occurrence.
    pub errors: Vec<SyncIssue>,
    /// Current phase.
    pub phase: SyncPhase,
    /// Counters from the last completed session.
    pub last_session: SessionSummary,
}

impl SyncStatus {
    /// Returns true if the most recent session left nothing to report.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Entity IDs with unresolved conflicts from the most recent session.
    pub fn unresolved_entities(&self) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|issue| issue.is_unresolved_conflict())
            .filter_map(SyncIssue::entity_id)
            .collect()
    }
}
