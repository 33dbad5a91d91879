//! Conflict detection.
//!
//! Classifies each entity touched in a session by comparing the net local
//! change, the remote snapshot and the checkpoint recorded at the end of
//! the last successful session.

use nestmate_sync_protocol::{
    payload_digest, ChangeRecord, EntityType, Operation, Payload, PayloadDigest, ProtocolResult,
    RemoteSnapshot, SyncConflict, Timestamp,
};
use std::collections::HashMap;

/// What the remote side looked like for one entity after the last session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCheckpoint {
    /// Remote version.
    pub version: u64,
    /// Remote change time.
    pub remote_timestamp: Timestamp,
    /// Whether the entity was deleted.
    pub deleted: bool,
    /// Digest of the remote payload.
    pub digest: PayloadDigest,
}

impl EntityCheckpoint {
    /// Records a snapshot as the new common base.
    pub fn observe(snapshot: &RemoteSnapshot) -> ProtocolResult<Self> {
        Ok(Self {
            version: snapshot.version,
            remote_timestamp: snapshot.remote_timestamp,
            deleted: snapshot.deleted,
            digest: payload_digest(&snapshot.payload)?,
        })
    }

    /// Returns true if the snapshot moved past this checkpoint.
    pub fn is_behind(&self, snapshot: &RemoteSnapshot) -> bool {
        snapshot.version > self.version || snapshot.remote_timestamp > self.remote_timestamp
    }
}

/// Per-user sync checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Position in the remote change stream already observed.
    pub cursor: u64,
    /// Per-entity base state.
    pub entities: HashMap<String, EntityCheckpoint>,
}

impl Checkpoint {
    /// Returns the entity's checkpoint, if any.
    pub fn entity(&self, entity_id: &str) -> Option<&EntityCheckpoint> {
        self.entities.get(entity_id)
    }
}

/// The fold of every drained record for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct NetChange {
    /// Entity ID.
    pub entity_id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Net operation.
    pub operation: Operation,
    /// Net payload (empty for deletes).
    pub payload: Payload,
    /// Latest local mutation time.
    pub local_timestamp: Timestamp,
    /// Number of records folded.
    pub record_count: usize,
}

impl NetChange {
    /// Folds records of one entity, given in log order.
    ///
    /// Create and update payloads are overlaid in order; a delete is
    /// terminal until a later create. Returns `None` for an empty slice.
    pub fn collapse(records: &[ChangeRecord]) -> Option<Self> {
        let first = records.first()?;
        let mut net = Self {
            entity_id: first.entity_id.clone(),
            entity_type: first.entity_type,
            operation: first.operation,
            payload: Payload::new(),
            local_timestamp: first.local_timestamp,
            record_count: 0,
        };

        for record in records {
            match record.operation {
                Operation::Delete => {
                    net.operation = Operation::Delete;
                    net.payload = Payload::new();
                }
                Operation::Create | Operation::Update => {
                    if net.operation.is_delete() {
                        net.payload = Payload::new();
                        net.operation = record.operation;
                    } else if net.record_count == 0 {
                        net.operation = record.operation;
                    }
                    net.payload.overlay(&record.payload);
                }
            }
            net.local_timestamp = net.local_timestamp.max(record.local_timestamp);
            net.record_count += 1;
        }

        Some(net)
    }

    /// Returns true if the net change deletes the entity.
    pub fn is_delete(&self) -> bool {
        self.operation.is_delete()
    }

    /// Returns true if the snapshot already holds what this change writes.
    pub fn is_reflected_in(&self, snapshot: &RemoteSnapshot) -> bool {
        if self.is_delete() {
            snapshot.deleted
        } else {
            !snapshot.deleted && snapshot.payload == self.payload
        }
    }
}

/// Outcome of detection for one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Only the local side changed; write it to the remote side.
    ApplyLocal(NetChange),
    /// Only the remote side changed; write it to the local side.
    ApplyRemote(RemoteSnapshot),
    /// Both sides already agree.
    Agreement,
    /// Both sides changed and disagree.
    Conflict(SyncConflict),
}

impl Detection {
    /// Returns true for conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Detection::Conflict(_))
    }

    /// Returns a short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Detection::ApplyLocal(_) => "apply_local",
            Detection::ApplyRemote(_) => "apply_remote",
            Detection::Agreement => "agreement",
            Detection::Conflict(_) => "conflict",
        }
    }
}

/// Compares local and remote state of one entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Creates a detector.
    pub fn new() -> Self {
        Self
    }

    /// Returns true if the remote side changed since the checkpoint.
    ///
    /// A snapshot with no checkpoint counts as changed.
    pub fn remote_changed(
        &self,
        remote: Option<&RemoteSnapshot>,
        checkpoint: Option<&EntityCheckpoint>,
    ) -> bool {
        match (remote, checkpoint) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(snapshot), Some(cp)) => cp.is_behind(snapshot),
        }
    }

    /// Classifies one entity.
    pub fn detect(
        &self,
        local: Option<&NetChange>,
        remote: Option<&RemoteSnapshot>,
        checkpoint: Option<&EntityCheckpoint>,
    ) -> ProtocolResult<Detection> {
        let remote_changed = self.remote_changed(remote, checkpoint);

        let (local, snapshot) = match (local, remote) {
            (None, None) => return Ok(Detection::Agreement),
            (None, Some(snapshot)) => {
                return Ok(if remote_changed {
                    Detection::ApplyRemote(snapshot.clone())
                } else {
                    Detection::Agreement
                });
            }
            (Some(local), None) => return Ok(Detection::ApplyLocal(local.clone())),
            (Some(local), Some(snapshot)) => (local, snapshot),
        };

        if local.is_reflected_in(snapshot) {
            return Ok(Detection::Agreement);
        }
        if !remote_changed {
            return Ok(Detection::ApplyLocal(local.clone()));
        }

        // Exactly one side deletes.
        if local.is_delete() != snapshot.deleted {
            return Ok(Detection::Conflict(conflict(local, snapshot)));
        }

        // Both live: a remote that only bumped its version without touching
        // the payload leaves the local change clean.
        let unchanged_base = match checkpoint {
            Some(cp) => !cp.deleted && cp.digest == payload_digest(&snapshot.payload)?,
            None => false,
        };
        if unchanged_base {
            Ok(Detection::ApplyLocal(local.clone()))
        } else {
            Ok(Detection::Conflict(conflict(local, snapshot)))
        }
    }
}

fn conflict(local: &NetChange, snapshot: &RemoteSnapshot) -> SyncConflict {
    SyncConflict {
        entity_id: local.entity_id.clone(),
        entity_type: local.entity_type,
        local_operation: local.operation,
        local_data: local.payload.clone(),
        remote_data: snapshot.payload.clone(),
        local_timestamp: local.local_timestamp,
        remote_timestamp: snapshot.remote_timestamp,
        remote_deleted: snapshot.deleted,
        remote_version: snapshot.version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn update(entity: &str, at: u64, payload: Payload) -> ChangeRecord {
        ChangeRecord::update("u1", EntityType::Task, entity, payload, ts(at))
    }

    fn net(records: &[ChangeRecord]) -> NetChange {
        NetChange::collapse(records).unwrap()
    }

    fn remote(payload: Payload, at: u64, version: u64) -> RemoteSnapshot {
        RemoteSnapshot::live(EntityType::Task, "t1", payload, ts(at), version)
    }

    #[test]
    fn collapse_overlays_payloads() {
        let records = vec![
            ChangeRecord::create(
                "u1",
                EntityType::Task,
                "t1",
                Payload::new().with("title", "draft").with("done", false),
                ts(10),
            ),
            update("t1", 20, Payload::new().with("done", true)),
        ];
        let net = net(&records);

        assert_eq!(net.operation, Operation::Create);
        assert_eq!(
            net.payload,
            Payload::new().with("title", "draft").with("done", true)
        );
        assert_eq!(net.local_timestamp, ts(20));
        assert_eq!(net.record_count, 2);
    }

    #[test]
    fn collapse_delete_is_terminal() {
        let records = vec![
            update("t1", 10, Payload::new().with("done", true)),
            ChangeRecord::delete("u1", EntityType::Task, "t1", ts(20)),
        ];
        let net = net(&records);
        assert!(net.is_delete());
        assert!(net.payload.is_empty());

        // Recreated after the delete: starts from a clean payload
        let records = vec![
            update("t1", 10, Payload::new().with("old", 1)),
            ChangeRecord::delete("u1", EntityType::Task, "t1", ts(20)),
            ChangeRecord::create("u1", EntityType::Task, "t1", Payload::new().with("new", 2), ts(30)),
        ];
        let net = self::net(&records);
        assert_eq!(net.operation, Operation::Create);
        assert_eq!(net.payload, Payload::new().with("new", 2));
    }

    #[test]
    fn collapse_empty() {
        assert!(NetChange::collapse(&[]).is_none());
    }

    #[test]
    fn local_only_is_clean() {
        let detector = ConflictDetector::new();
        let local = net(&[update("t1", 10, Payload::new().with("a", 1))]);

        let detection = detector.detect(Some(&local), None, None).unwrap();
        assert_eq!(detection, Detection::ApplyLocal(local));
    }

    #[test]
    fn remote_only_is_applied_when_changed() {
        let detector = ConflictDetector::new();
        let snapshot = remote(Payload::new().with("a", 1), 10, 1);

        let detection = detector.detect(None, Some(&snapshot), None).unwrap();
        assert_eq!(detection, Detection::ApplyRemote(snapshot.clone()));

        let cp = EntityCheckpoint::observe(&snapshot).unwrap();
        let detection = detector.detect(None, Some(&snapshot), Some(&cp)).unwrap();
        assert_eq!(detection, Detection::Agreement);
    }

    #[test]
    fn unchanged_remote_leaves_local_clean() {
        let detector = ConflictDetector::new();
        let snapshot = remote(Payload::new().with("a", 1), 10, 1);
        let cp = EntityCheckpoint::observe(&snapshot).unwrap();
        let local = net(&[update("t1", 20, Payload::new().with("a", 2))]);

        let detection = detector.detect(Some(&local), Some(&snapshot), Some(&cp)).unwrap();
        assert_eq!(detection, Detection::ApplyLocal(local));
    }

    #[test]
    fn both_changed_is_conflict() {
        let detector = ConflictDetector::new();
        let base = remote(Payload::new().with("a", 1), 10, 1);
        let cp = EntityCheckpoint::observe(&base).unwrap();
        let moved = remote(Payload::new().with("a", 3), 30, 2);
        let local = net(&[update("t1", 20, Payload::new().with("a", 2))]);

        match detector.detect(Some(&local), Some(&moved), Some(&cp)).unwrap() {
            Detection::Conflict(conflict) => {
                assert_eq!(conflict.entity_id, "t1");
                assert_eq!(conflict.local_data, Payload::new().with("a", 2));
                assert_eq!(conflict.remote_data, Payload::new().with("a", 3));
                assert_eq!(conflict.local_timestamp, ts(20));
                assert_eq!(conflict.remote_timestamp, ts(30));
                assert_eq!(conflict.remote_version, 2);
                assert!(conflict.is_update_update());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn version_bump_without_payload_change_is_clean() {
        let detector = ConflictDetector::new();
        let base = remote(Payload::new().with("a", 1), 10, 1);
        let cp = EntityCheckpoint::observe(&base).unwrap();
        let touched = remote(Payload::new().with("a", 1), 15, 2);
        let local = net(&[update("t1", 20, Payload::new().with("a", 2))]);

        let detection = detector.detect(Some(&local), Some(&touched), Some(&cp)).unwrap();
        assert!(matches!(detection, Detection::ApplyLocal(_)));
    }

    #[test]
    fn same_value_is_agreement() {
        let detector = ConflictDetector::new();
        let snapshot = remote(Payload::new().with("a", 2), 30, 2);
        let local = net(&[update("t1", 20, Payload::new().with("a", 2))]);

        let detection = detector.detect(Some(&local), Some(&snapshot), None).unwrap();
        assert_eq!(detection, Detection::Agreement);
    }

    #[test]
    fn double_delete_is_agreement() {
        let detector = ConflictDetector::new();
        let tombstone = RemoteSnapshot::tombstone(EntityType::Task, "t1", ts(30), 3);
        let local = net(&[ChangeRecord::delete("u1", EntityType::Task, "t1", ts(20))]);

        let detection = detector.detect(Some(&local), Some(&tombstone), None).unwrap();
        assert_eq!(detection, Detection::Agreement);
    }

    #[test]
    fn delete_update_is_always_conflict() {
        let detector = ConflictDetector::new();
        let base = remote(Payload::new().with("a", 1), 10, 1);
        let cp = EntityCheckpoint::observe(&base).unwrap();

        // Local delete, remote update
        let moved = remote(Payload::new().with("a", 5), 30, 2);
        let local = net(&[ChangeRecord::delete("u1", EntityType::Task, "t1", ts(20))]);
        let detection = detector.detect(Some(&local), Some(&moved), Some(&cp)).unwrap();
        match detection {
            Detection::Conflict(conflict) => assert!(conflict.is_delete_update()),
            other => panic!("expected conflict, got {other:?}"),
        }

        // Local update, remote delete
        let tombstone = RemoteSnapshot::tombstone(EntityType::Task, "t1", ts(30), 2);
        let local = net(&[update("t1", 40, Payload::new().with("a", 9))]);
        let detection = detector.detect(Some(&local), Some(&tombstone), Some(&cp)).unwrap();
        match detection {
            Detection::Conflict(conflict) => {
                assert!(conflict.remote_deleted);
                assert!(conflict.is_delete_update());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn checkpoint_tracks_snapshot() {
        let snapshot = remote(Payload::new().with("a", 1), 10, 4);
        let cp = EntityCheckpoint::observe(&snapshot).unwrap();
        assert!(!cp.is_behind(&snapshot));
        assert!(cp.is_behind(&remote(Payload::new().with("a", 1), 10, 5)));
        assert!(cp.is_behind(&remote(Payload::new().with("a", 1), 11, 4)));
    }
}
