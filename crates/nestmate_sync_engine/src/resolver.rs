//! Conflict resolution strategies.

use nestmate_sync_protocol::{ConflictPolicy, ConflictResolution, SyncConflict};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Result of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The strategy picked an outcome.
    Resolved(ConflictResolution),
    /// The strategy could not decide; a human must.
    NeedsManual(String),
}

/// A pluggable conflict resolution policy.
///
/// Strategies only ever see update/update conflicts when used through
/// [`ConflictResolver`]; delete/update conflicts are settled before the
/// strategy is consulted.
pub trait ResolutionStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Decides one conflict.
    fn resolve(&self, conflict: &SyncConflict) -> Resolution;
}

/// The later timestamp wins; remote wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl ResolutionStrategy for LastWriterWins {
    fn name(&self) -> &'static str {
        "last_writer_wins"
    }

    fn resolve(&self, conflict: &SyncConflict) -> Resolution {
        if conflict.local_timestamp > conflict.remote_timestamp {
            Resolution::Resolved(ConflictResolution::KeepLocal)
        } else {
            Resolution::Resolved(ConflictResolution::AcceptRemote)
        }
    }
}

/// The remote side always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl ResolutionStrategy for RemoteWins {
    fn name(&self) -> &'static str {
        "remote_wins"
    }

    fn resolve(&self, _conflict: &SyncConflict) -> Resolution {
        Resolution::Resolved(ConflictResolution::AcceptRemote)
    }
}

/// The local side always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWins;

impl ResolutionStrategy for LocalWins {
    fn name(&self) -> &'static str {
        "local_wins"
    }

    fn resolve(&self, _conflict: &SyncConflict) -> Resolution {
        Resolution::Resolved(ConflictResolution::KeepLocal)
    }
}

/// Union of both payloads; on shared fields the later side wins, remote on
/// ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMerge;

impl ResolutionStrategy for FieldMerge {
    fn name(&self) -> &'static str {
        "field_merge"
    }

    fn resolve(&self, conflict: &SyncConflict) -> Resolution {
        if !conflict.is_update_update() {
            return LastWriterWins.resolve(conflict);
        }

        let merged = if conflict.local_timestamp > conflict.remote_timestamp {
            let mut merged = conflict.remote_data.clone();
            merged.overlay(&conflict.local_data);
            merged
        } else {
            let mut merged = conflict.local_data.clone();
            merged.overlay(&conflict.remote_data);
            merged
        };
        Resolution::Resolved(ConflictResolution::Merge(merged))
    }
}

/// Never decides; every conflict is left for a human.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manual;

impl ResolutionStrategy for Manual {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn resolve(&self, _conflict: &SyncConflict) -> Resolution {
        Resolution::NeedsManual("manual resolution required".into())
    }
}

/// Returns the built-in strategy for a policy.
pub fn strategy_for(policy: ConflictPolicy) -> Arc<dyn ResolutionStrategy> {
    match policy {
        ConflictPolicy::LastWriterWins => Arc::new(LastWriterWins),
        ConflictPolicy::RemoteWins => Arc::new(RemoteWins),
        ConflictPolicy::LocalWins => Arc::new(LocalWins),
        ConflictPolicy::FieldMerge => Arc::new(FieldMerge),
        ConflictPolicy::Manual => Arc::new(Manual),
    }
}

/// Applies a strategy to conflicts, enforcing delete precedence.
#[derive(Clone)]
pub struct ConflictResolver {
    strategy: Arc<dyn ResolutionStrategy>,
}

impl ConflictResolver {
    /// Creates a resolver around a strategy.
    pub fn new(strategy: Arc<dyn ResolutionStrategy>) -> Self {
        Self { strategy }
    }

    /// Creates a resolver for a named policy.
    pub fn from_policy(policy: ConflictPolicy) -> Self {
        Self::new(strategy_for(policy))
    }

    /// Returns the strategy name.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Resolves one conflict.
    ///
    /// A delete on either side beats a concurrent update regardless of
    /// timestamps or strategy.
    pub fn resolve(&self, conflict: &SyncConflict) -> Resolution {
        if conflict.local_deleted() || conflict.remote_deleted {
            let loser = if conflict.local_deleted() { "remote" } else { "local" };
            if conflict.is_delete_update() {
                info!(
                    entity_id = %conflict.entity_id,
                    entity_type = %conflict.entity_type,
                    discarded = loser,
                    "delete wins over concurrent update"
                );
            }
            return Resolution::Resolved(ConflictResolution::Delete);
        }

        let resolution = self.strategy.resolve(conflict);
        if let Resolution::Resolved(outcome) = &resolution {
            let discarded = match outcome {
                ConflictResolution::KeepLocal => Some("remote"),
                ConflictResolution::AcceptRemote => Some("local"),
                ConflictResolution::Merge(_) | ConflictResolution::Delete => None,
            };
            if let Some(discarded) = discarded {
                info!(
                    entity_id = %conflict.entity_id,
                    entity_type = %conflict.entity_type,
                    strategy = self.strategy.name(),
                    discarded,
                    local_timestamp = %conflict.local_timestamp,
                    remote_timestamp = %conflict.remote_timestamp,
                    "conflict resolved"
                );
            }
        }
        resolution
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::from_policy(ConflictPolicy::default())
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategy", &self.strategy.name())
            .finish()
    }
}
