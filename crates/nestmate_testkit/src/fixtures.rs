//! Test fixtures and record builders.

use nestmate_sync_engine::{
    CancellationToken, EntityStore, MemoryStore, SyncConfig, SyncCoordinator, SyncReport,
    SyncResult,
};
use nestmate_sync_protocol::{
    ChangeRecord, ConflictPolicy, EntityType, Payload, RemoteSnapshot, Timestamp,
};
use std::sync::Arc;

/// A coordinator over two in-memory stores.
pub struct TestSync {
    /// The coordinator under test.
    pub coordinator: SyncCoordinator<MemoryStore, MemoryStore>,
}

impl TestSync {
    /// Creates a fixture with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Creates a fixture with a conflict policy.
    pub fn with_policy(policy: ConflictPolicy) -> Self {
        Self::with_config(SyncConfig::new().with_conflict_policy(policy))
    }

    /// Creates a fixture with a full configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            coordinator: SyncCoordinator::new(
                config,
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryStore::new()),
            ),
        }
    }

    /// Returns the local store.
    pub fn local_store(&self) -> &MemoryStore {
        self.coordinator.local()
    }

    /// Returns the remote store.
    pub fn remote_store(&self) -> &MemoryStore {
        self.coordinator.remote()
    }

    /// Writes a snapshot to the remote store as another device would.
    pub fn seed_remote(&self, user_id: &str, snapshot: RemoteSnapshot) {
        self.remote_store().put_snapshot(user_id, snapshot);
    }

    /// Writes a snapshot to the local store.
    pub fn seed_local(&self, user_id: &str, snapshot: RemoteSnapshot) {
        self.local_store().put_snapshot(user_id, snapshot);
    }

    /// Queues records, panicking on rejection.
    pub fn queue(&self, records: Vec<ChangeRecord>) -> usize {
        self.coordinator
            .queue_local_changes(records)
            .expect("records rejected")
    }

    /// Runs one session with a fresh token.
    pub fn run(&self, user_id: &str) -> SyncResult<SyncReport> {
        self.coordinator
            .sync_user_data(user_id, &CancellationToken::new())
    }

    /// Returns the remote snapshot of an entity.
    pub fn remote_snapshot(&self, user_id: &str, entity_id: &str) -> Option<RemoteSnapshot> {
        self.remote_store()
            .get_snapshot(user_id, entity_id)
            .expect("remote store unavailable")
    }

    /// Returns the local snapshot of an entity.
    pub fn local_snapshot(&self, user_id: &str, entity_id: &str) -> Option<RemoteSnapshot> {
        self.local_store()
            .get_snapshot(user_id, entity_id)
            .expect("local store unavailable")
    }

    /// Returns the live remote payload, `None` if absent or deleted.
    pub fn remote_payload(&self, user_id: &str, entity_id: &str) -> Option<Payload> {
        live_payload(self.remote_snapshot(user_id, entity_id))
    }

    /// Returns the live local payload, `None` if absent or deleted.
    pub fn local_payload(&self, user_id: &str, entity_id: &str) -> Option<Payload> {
        live_payload(self.local_snapshot(user_id, entity_id))
    }
}

impl Default for TestSync {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestSync {
    type Target = SyncCoordinator<MemoryStore, MemoryStore>;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

fn live_payload(snapshot: Option<RemoteSnapshot>) -> Option<Payload> {
    snapshot.filter(|s| !s.deleted).map(|s| s.payload)
}

/// Shorthand for a millisecond timestamp.
pub fn ts(millis: u64) -> Timestamp {
    Timestamp::from_millis(millis)
}

/// An expense payload with only an amount.
pub fn amount(value: i64) -> Payload {
    Payload::new().with("amount", value)
}

/// An expense update record.
pub fn expense_update(user_id: &str, entity_id: &str, at: u64, value: i64) -> ChangeRecord {
    ChangeRecord::update(user_id, EntityType::Expense, entity_id, amount(value), ts(at))
}

/// An expense create record.
pub fn expense_create(user_id: &str, entity_id: &str, at: u64, value: i64) -> ChangeRecord {
    ChangeRecord::create(user_id, EntityType::Expense, entity_id, amount(value), ts(at))
}

/// An expense delete record.
pub fn expense_delete(user_id: &str, entity_id: &str, at: u64) -> ChangeRecord {
    ChangeRecord::delete(user_id, EntityType::Expense, entity_id, ts(at))
}

/// A live expense snapshot.
pub fn expense_snapshot(entity_id: &str, at: u64, version: u64, value: i64) -> RemoteSnapshot {
    RemoteSnapshot::live(EntityType::Expense, entity_id, amount(value), ts(at), version)
}

/// A deleted expense snapshot.
pub fn expense_tombstone(entity_id: &str, at: u64, version: u64) -> RemoteSnapshot {
    RemoteSnapshot::tombstone(EntityType::Expense, entity_id, ts(at), version)
}

/// A task snapshot with a title and completion flag.
pub fn task_snapshot(entity_id: &str, at: u64, version: u64, title: &str, done: bool) -> RemoteSnapshot {
    RemoteSnapshot::live(
        EntityType::Task,
        entity_id,
        Payload::new().with("title", title).with("done", done),
        ts(at),
        version,
    )
}
