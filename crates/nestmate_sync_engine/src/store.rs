//! Storage contracts consumed by the coordinator.
//!
//! The engine never talks to a database directly. The local and remote
//! stores are reached through [`EntityStore`]; the remote side additionally
//! exposes its change stream through [`RemoteChangeSource`].

use nestmate_sync_protocol::{EntityType, Operation, Payload, RemoteSnapshot, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors a store may report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The entity's version did not match the expected version.
    #[error("version conflict on entity {entity_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Entity ID.
        entity_id: String,
        /// Version the write expected.
        expected: u64,
        /// Version the store holds.
        actual: u64,
    },

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A single write against a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreWrite {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity ID.
    pub entity_id: String,
    /// Operation to apply. `Update` replaces the payload.
    pub operation: Operation,
    /// Full entity payload (ignored for deletes).
    pub payload: Payload,
    /// Version the entity must currently have; 0 means "must not exist".
    pub expected_version: u64,
    /// Time of the mutation being written.
    pub timestamp: Timestamp,
}

/// Remote changes since a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteChanges {
    /// Changed entities, oldest change first.
    pub snapshots: Vec<RemoteSnapshot>,
    /// Cursor to pass on the next call.
    pub cursor: u64,
}

/// A durable entity store (local or remote).
///
/// Implementations are blocking and scoped by user.
pub trait EntityStore: Send + Sync {
    /// Returns the current snapshot of an entity, including tombstones.
    fn get_snapshot(&self, user_id: &str, entity_id: &str) -> StoreResult<Option<RemoteSnapshot>>;

    /// Applies a write with optimistic concurrency.
    ///
    /// Returns the entity's new version.
    fn apply_change(&self, user_id: &str, write: &StoreWrite) -> StoreResult<u64>;
}

/// The remote side's change stream.
pub trait RemoteChangeSource: Send + Sync {
    /// Returns the user's entities changed after `cursor`.
    ///
    /// Each call returns a finite batch.
    fn changes_since(&self, user_id: &str, cursor: u64) -> StoreResult<RemoteChanges>;
}

#[derive(Debug, Clone)]
struct Entry {
    snapshot: RemoteSnapshot,
    sequence: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<(String, String), Entry>,
    last_sequence: u64,
}

impl MemoryState {
    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }
}

/// An in-memory store implementing both contracts.
///
/// Used by tests and the CLI as either the local or the remote side.
/// Deletes are kept as tombstones so they show up in `changes_since`.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    available: AtomicBool,
    failing: Mutex<HashSet<String>>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty, available store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            available: AtomicBool::new(true),
            failing: Mutex::new(HashSet::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Stores a snapshot exactly as given, as if another device wrote it.
    pub fn put_snapshot(&self, user_id: &str, snapshot: RemoteSnapshot) {
        let mut state = self.state.write();
        let sequence = state.next_sequence();
        state.entities.insert(
            (user_id.to_string(), snapshot.entity_id.clone()),
            Entry { snapshot, sequence },
        );
    }

    /// Returns every snapshot of the user, sorted by entity ID.
    pub fn snapshots(&self, user_id: &str) -> Vec<RemoteSnapshot> {
        let state = self.state.read();
        let mut snapshots: Vec<RemoteSnapshot> = state
            .entities
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, entry)| entry.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        snapshots
    }

    /// Makes every call fail with `Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns whether the store is reachable.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Makes the next write to the entity fail with `Unavailable`.
    pub fn fail_next_apply(&self, entity_id: impl Into<String>) {
        self.failing.lock().insert(entity_id.into());
    }

    /// Returns the number of successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for MemoryStore {
    fn get_snapshot(&self, user_id: &str, entity_id: &str) -> StoreResult<Option<RemoteSnapshot>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .entities
            .get(&(user_id.to_string(), entity_id.to_string()))
            .map(|entry| entry.snapshot.clone()))
    }

    fn apply_change(&self, user_id: &str, write: &StoreWrite) -> StoreResult<u64> {
        self.check_available()?;
        if self.failing.lock().remove(&write.entity_id) {
            return Err(StoreError::Unavailable(format!(
                "injected failure for {}",
                write.entity_id
            )));
        }

        let mut state = self.state.write();
        let key = (user_id.to_string(), write.entity_id.clone());
        let current = state.entities.get(&key).map_or(0, |e| e.snapshot.version);
        if current != write.expected_version {
            return Err(StoreError::VersionConflict {
                entity_id: write.entity_id.clone(),
                expected: write.expected_version,
                actual: current,
            });
        }

        let version = current + 1;
        let snapshot = match write.operation {
            Operation::Delete => RemoteSnapshot::tombstone(
                write.entity_type,
                write.entity_id.clone(),
                write.timestamp,
                version,
            ),
            Operation::Create | Operation::Update => RemoteSnapshot::live(
                write.entity_type,
                write.entity_id.clone(),
                write.payload.clone(),
                write.timestamp,
                version,
            ),
        };
        let sequence = state.next_sequence();
        state.entities.insert(key, Entry { snapshot, sequence });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }
}

impl RemoteChangeSource for MemoryStore {
    fn changes_since(&self, user_id: &str, cursor: u64) -> StoreResult<RemoteChanges> {
        self.check_available()?;
        let state = self.state.read();
        let mut entries: Vec<&Entry> = state
            .entities
            .iter()
            .filter(|((user, _), entry)| user == user_id && entry.sequence > cursor)
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_by_key(|entry| entry.sequence);

        Ok(RemoteChanges {
            snapshots: entries.into_iter().map(|e| e.snapshot.clone()).collect(),
            cursor: state.last_sequence.max(cursor),
        })
    }
}
