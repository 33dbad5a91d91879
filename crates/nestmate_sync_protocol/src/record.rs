//! Change records and remote snapshots.

use crate::error::ProtocolError;
use crate::value::{Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The kind of domain entity a record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// An expense entry.
    Expense,
    /// A task or todo item.
    Task,
    /// A free-form note.
    Note,
}

impl EntityType {
    /// All entity types.
    pub const ALL: [EntityType; 3] = [EntityType::Expense, EntityType::Task, EntityType::Note];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Expense => "expense",
            EntityType::Task => "task",
            EntityType::Note => "note",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expense" => Ok(EntityType::Expense),
            "task" => Ok(EntityType::Task),
            "note" => Ok(EntityType::Note),
            other => Err(ProtocolError::UnknownEntityType(other.to_string())),
        }
    }
}

/// Type of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

impl Operation {
    /// Returns true for `Delete`.
    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete)
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

/// A single local mutation awaiting sync.
///
/// # Fields
///
/// - `id`: identifies the change itself, not the entity
/// - `user_id`: owning user; records of different users are never compared
/// - `entity_type` / `entity_id`: the affected entity
/// - `operation`: create, update or delete
/// - `payload`: opaque field map (empty for most deletes)
/// - `local_timestamp`: when the mutation was made locally
///
/// Records of one user are totally ordered by `(local_timestamp, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Unique change ID.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity ID.
    pub entity_id: String,
    /// Operation type.
    pub operation: Operation,
    /// Entity payload.
    #[serde(default)]
    pub payload: Payload,
    /// Local mutation time.
    pub local_timestamp: Timestamp,
}

impl ChangeRecord {
    /// Creates a record with a fresh change ID.
    pub fn new(
        user_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        payload: Payload,
        local_timestamp: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            payload,
            local_timestamp,
        }
    }

    /// Creates a `Create` record.
    pub fn create(
        user_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: Payload,
        local_timestamp: Timestamp,
    ) -> Self {
        Self::new(user_id, entity_type, entity_id, Operation::Create, payload, local_timestamp)
    }

    /// Creates an `Update` record.
    pub fn update(
        user_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: Payload,
        local_timestamp: Timestamp,
    ) -> Self {
        Self::new(user_id, entity_type, entity_id, Operation::Update, payload, local_timestamp)
    }

    /// Creates a `Delete` record with an empty payload.
    pub fn delete(
        user_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        local_timestamp: Timestamp,
    ) -> Self {
        Self::new(
            user_id,
            entity_type,
            entity_id,
            Operation::Delete,
            Payload::new(),
            local_timestamp,
        )
    }

    /// Key giving the per-user total order.
    pub fn order_key(&self) -> (Timestamp, Uuid) {
        (self.local_timestamp, self.id)
    }
}

/// A store's current view of one entity.
///
/// Deleted entities are kept as tombstones (`deleted = true`) so deletions
/// can be observed by the other side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Entity ID.
    pub entity_id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Current payload (last live payload for tombstones).
    #[serde(default)]
    pub payload: Payload,
    /// Time of the last change on the store side.
    pub remote_timestamp: Timestamp,
    /// Whether the entity is deleted.
    #[serde(default)]
    pub deleted: bool,
    /// Per-entity version, incremented on every write.
    pub version: u64,
}

impl RemoteSnapshot {
    /// Creates a live snapshot.
    pub fn live(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: Payload,
        remote_timestamp: Timestamp,
        version: u64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            payload,
            remote_timestamp,
            deleted: false,
            version,
        }
    }

    /// Creates a tombstone snapshot.
    pub fn tombstone(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        remote_timestamp: Timestamp,
        version: u64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            payload: Payload::new(),
            remote_timestamp,
            deleted: true,
            version,
        }
    }
}
