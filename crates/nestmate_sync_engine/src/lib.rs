//! # NestMate Sync Engine
//!
//! Two-party synchronization of expenses, tasks and notes between a local
//! store and a remote authoritative store.
//!
//! This crate provides:
//! - A per-user change log of pending local mutations
//! - Store contracts and an in-memory store
//! - Conflict detection against per-entity checkpoints
//! - Pluggable conflict resolution strategies
//! - The sync coordinator state machine and per-user status
//! - Retry with exponential backoff
//!
//! ## Session flow
//!
//! `Idle → Pulling → Detecting → Resolving → Applying → Idle`, with `Failed`
//! reachable from every active phase:
//! 1. Pull remote snapshots changed since the user's checkpoint
//! 2. Drain the change log and fold records per entity
//! 3. Classify each entity; resolve conflicts with the configured strategy
//! 4. Write outcomes to the remote store, then the local store
//!
//! ## Key Invariants
//!
//! - At most one session (or manual resolution) per user at a time
//! - Different users never block each other
//! - Delete beats a concurrent update regardless of strategy
//! - An aborted session changes nothing durable
//! - At most one conflict per entity per session

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod change_log;
mod config;
mod coordinator;
mod detector;
mod error;
mod resolver;
mod status;
mod store;

pub use cancel::CancellationToken;
pub use change_log::ChangeLog;
pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{SyncCoordinator, SyncReport};
pub use detector::{Checkpoint, ConflictDetector, Detection, EntityCheckpoint, NetChange};
pub use error::{SyncError, SyncResult};
pub use resolver::{
    strategy_for, ConflictResolver, FieldMerge, LastWriterWins, LocalWins, Manual, RemoteWins,
    Resolution, ResolutionStrategy,
};
pub use status::{SessionGuard, SyncStatusStore};
pub use store::{
    EntityStore, MemoryStore, RemoteChangeSource, RemoteChanges, StoreError, StoreResult,
    StoreWrite,
};
