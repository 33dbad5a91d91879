//! Conflict detection and resolution types.

use crate::error::ProtocolError;
use crate::record::{EntityType, Operation};
use crate::value::{Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A conflict between a local change and the remote state of one entity.
///
/// Produced when both sides changed the same entity since the last common
/// checkpoint. `local_data` is the net payload the local side wants to
/// write; `remote_data` is the remote payload at pull time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Entity ID.
    pub entity_id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Net local operation.
    pub local_operation: Operation,
    /// Local payload.
    pub local_data: Payload,
    /// Remote payload.
    pub remote_data: Payload,
    /// Latest local mutation time for the entity.
    pub local_timestamp: Timestamp,
    /// Remote change time.
    pub remote_timestamp: Timestamp,
    /// Whether the remote side has deleted the entity.
    pub remote_deleted: bool,
    /// Remote version observed when the conflict was detected.
    pub remote_version: u64,
}

impl SyncConflict {
    /// Returns true if the local side deletes the entity.
    pub fn local_deleted(&self) -> bool {
        self.local_operation.is_delete()
    }

    /// Returns true if exactly one side deletes the entity.
    pub fn is_delete_update(&self) -> bool {
        self.local_deleted() != self.remote_deleted
    }

    /// Returns true if both sides changed field values.
    pub fn is_update_update(&self) -> bool {
        !self.local_deleted() && !self.remote_deleted
    }
}

/// Resolution for a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local version (write it to the remote side).
    KeepLocal,
    /// Accept the remote version (write it to the local side).
    AcceptRemote,
    /// Write a merged payload to both sides.
    Merge(Payload),
    /// Delete the entity on both sides.
    Delete,
}

impl ConflictResolution {
    /// Returns a short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ConflictResolution::KeepLocal => "keep_local",
            ConflictResolution::AcceptRemote => "accept_remote",
            ConflictResolution::Merge(_) => "merge",
            ConflictResolution::Delete => "delete",
        }
    }
}

/// Named policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Last write wins (by timestamp); remote wins ties.
    #[default]
    LastWriterWins,
    /// Remote always wins.
    RemoteWins,
    /// Local always wins.
    LocalWins,
    /// Field-level merge; later timestamp wins on shared fields.
    FieldMerge,
    /// Manual resolution required.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy automatically resolves conflicts.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LastWriterWins => "last_writer_wins",
            ConflictPolicy::RemoteWins => "remote_wins",
            ConflictPolicy::LocalWins => "local_wins",
            ConflictPolicy::FieldMerge => "field_merge",
            ConflictPolicy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_writer_wins" | "lww" => Ok(ConflictPolicy::LastWriterWins),
            "remote_wins" => Ok(ConflictPolicy::RemoteWins),
            "local_wins" => Ok(ConflictPolicy::LocalWins),
            "field_merge" => Ok(ConflictPolicy::FieldMerge),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(ProtocolError::UnknownPolicy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(local_operation: Operation, remote_deleted: bool) -> SyncConflict {
        SyncConflict {
            entity_id: "t1".into(),
            entity_type: EntityType::Task,
            local_operation,
            local_data: Payload::new().with("done", true),
            remote_data: Payload::new().with("done", false),
            local_timestamp: Timestamp::from_millis(10),
            remote_timestamp: Timestamp::from_millis(20),
            remote_deleted,
            remote_version: 2,
        }
    }

    #[test]
    fn conflict_kinds() {
        let uu = conflict(Operation::Update, false);
        assert!(uu.is_update_update());
        assert!(!uu.is_delete_update());

        let du = conflict(Operation::Delete, false);
        assert!(du.local_deleted());
        assert!(du.is_delete_update());

        let ud = conflict(Operation::Update, true);
        assert!(ud.is_delete_update());
        assert!(!ud.is_update_update());
    }

    #[test]
    fn policy_names() {
        for policy in [
            ConflictPolicy::LastWriterWins,
            ConflictPolicy::RemoteWins,
            ConflictPolicy::LocalWins,
            ConflictPolicy::FieldMerge,
            ConflictPolicy::Manual,
        ] {
            assert_eq!(policy.as_str().parse::<ConflictPolicy>().unwrap(), policy);
        }
        assert_eq!("lww".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::LastWriterWins);
        assert!("coin_flip".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::LastWriterWins);
    }

    #[test]
    fn manual_policy_does_not_auto_resolve() {
        assert!(ConflictPolicy::LastWriterWins.auto_resolves());
        assert!(!ConflictPolicy::Manual.auto_resolves());
    }

    #[test]
    fn resolution_json() {
        let merge = ConflictResolution::Merge(Payload::new().with("title", "x"));
        let json = serde_json::to_string(&merge).unwrap();
        assert_eq!(json, r#"{"kind":"merge","payload":{"title":"x"}}"#);

        let keep: ConflictResolution = serde_json::from_str(r#"{"kind":"keep_local"}"#).unwrap();
        assert_eq!(keep, ConflictResolution::KeepLocal);
        assert_eq!(keep.name(), "keep_local");
    }
}
