//! Sync coordinator state machine.

use crate::cancel::CancellationToken;
use crate::change_log::ChangeLog;
use crate::config::SyncConfig;
use crate::detector::{Checkpoint, ConflictDetector, Detection, EntityCheckpoint, NetChange};
use crate::error::{SyncError, SyncResult};
use crate::resolver::{ConflictResolver, Resolution, ResolutionStrategy};
use crate::status::{SessionGuard, SyncStatusStore};
use crate::store::{EntityStore, RemoteChangeSource, StoreError, StoreWrite};
use nestmate_sync_protocol::{
    ChangeRecord, ConflictResolution, EntityType, Operation, Payload, RemoteSnapshot,
    SessionSummary, SyncConflict, SyncIssue, SyncPhase, SyncStatus, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a completed sync session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// The synced user.
    pub user_id: String,
    /// Session counters.
    pub summary: SessionSummary,
    /// Wall time spent in the session.
    pub duration: Duration,
    /// Completion time recorded in the status.
    pub last_sync_time: Timestamp,
}

/// State an entity should end up in on both sides.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Live(Payload),
    Deleted,
}

impl Target {
    fn of(snapshot: &RemoteSnapshot) -> Self {
        if snapshot.deleted {
            Target::Deleted
        } else {
            Target::Live(snapshot.payload.clone())
        }
    }

    fn matches(&self, snapshot: Option<&RemoteSnapshot>) -> bool {
        match (self, snapshot) {
            (Target::Deleted, None) => true,
            (Target::Deleted, Some(current)) => current.deleted,
            (Target::Live(_), None) => false,
            (Target::Live(payload), Some(current)) => !current.deleted && &current.payload == payload,
        }
    }
}

/// Writes decided for one entity.
#[derive(Debug, Clone)]
struct EntityPlan {
    entity_id: String,
    entity_type: EntityType,
    target: Target,
    timestamp: Timestamp,
    remote: Option<RemoteSnapshot>,
}

impl EntityPlan {
    fn local(net: NetChange, remote: Option<RemoteSnapshot>) -> Self {
        let target = if net.is_delete() {
            Target::Deleted
        } else {
            Target::Live(net.payload)
        };
        Self {
            entity_id: net.entity_id,
            entity_type: net.entity_type,
            target,
            timestamp: net.local_timestamp,
            remote,
        }
    }

    fn remote(snapshot: RemoteSnapshot) -> Self {
        Self {
            entity_id: snapshot.entity_id.clone(),
            entity_type: snapshot.entity_type,
            target: Target::of(&snapshot),
            timestamp: snapshot.remote_timestamp,
            remote: Some(snapshot),
        }
    }

    fn resolved(conflict: &SyncConflict, resolution: &ConflictResolution) -> Self {
        let latest = conflict.local_timestamp.max(conflict.remote_timestamp);
        let (target, timestamp) = match resolution {
            ConflictResolution::KeepLocal if conflict.local_deleted() => {
                (Target::Deleted, conflict.local_timestamp)
            }
            ConflictResolution::KeepLocal => (
                Target::Live(conflict.local_data.clone()),
                conflict.local_timestamp,
            ),
            ConflictResolution::AcceptRemote if conflict.remote_deleted => {
                (Target::Deleted, conflict.remote_timestamp)
            }
            ConflictResolution::AcceptRemote => (
                Target::Live(conflict.remote_data.clone()),
                conflict.remote_timestamp,
            ),
            ConflictResolution::Merge(payload) => (Target::Live(payload.clone()), latest),
            ConflictResolution::Delete => (Target::Deleted, latest),
        };

        Self {
            entity_id: conflict.entity_id.clone(),
            entity_type: conflict.entity_type,
            target,
            timestamp,
            remote: Some(RemoteSnapshot {
                entity_id: conflict.entity_id.clone(),
                entity_type: conflict.entity_type,
                payload: conflict.remote_data.clone(),
                remote_timestamp: conflict.remote_timestamp,
                deleted: conflict.remote_deleted,
                version: conflict.remote_version,
            }),
        }
    }

    fn write_over(&self, current: Option<&RemoteSnapshot>) -> StoreWrite {
        let (operation, payload) = match &self.target {
            Target::Deleted => (Operation::Delete, Payload::new()),
            Target::Live(payload) if current.is_some_and(|s| !s.deleted) => {
                (Operation::Update, payload.clone())
            }
            Target::Live(payload) => (Operation::Create, payload.clone()),
        };
        StoreWrite {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            operation,
            payload,
            expected_version: current.map_or(0, |s| s.version),
            timestamp: self.timestamp,
        }
    }

    fn written(&self, version: u64) -> RemoteSnapshot {
        match &self.target {
            Target::Deleted => RemoteSnapshot::tombstone(
                self.entity_type,
                self.entity_id.clone(),
                self.timestamp,
                version,
            ),
            Target::Live(payload) => RemoteSnapshot::live(
                self.entity_type,
                self.entity_id.clone(),
                payload.clone(),
                self.timestamp,
                version,
            ),
        }
    }

    fn issue(&self, err: StoreError) -> SyncIssue {
        match err {
            StoreError::VersionConflict {
                expected, actual, ..
            } => SyncIssue::VersionConflict {
                entity_type: self.entity_type,
                entity_id: self.entity_id.clone(),
                expected,
                actual,
            },
            StoreError::Unavailable(message) => SyncIssue::StoreFailure {
                entity_type: self.entity_type,
                entity_id: self.entity_id.clone(),
                message,
            },
        }
    }
}

/// One entity after detection.
struct Classified {
    remote: Option<RemoteSnapshot>,
    detection: Detection,
}

/// Orchestrates sync sessions between a local and a remote store.
///
/// One session per user runs at a time; sessions of different users run in
/// parallel. The coordinator owns the per-user status, checkpoints and the
/// conflicts left open for manual resolution.
pub struct SyncCoordinator<L: EntityStore, R: EntityStore + RemoteChangeSource> {
    config: SyncConfig,
    change_log: Arc<ChangeLog>,
    local: Arc<L>,
    remote: Arc<R>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    status: SyncStatusStore,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    open_conflicts: Mutex<HashMap<String, BTreeMap<String, SyncConflict>>>,
}

impl<L: EntityStore, R: EntityStore + RemoteChangeSource> SyncCoordinator<L, R> {
    /// Creates a coordinator with its own change log.
    pub fn new(config: SyncConfig, local: Arc<L>, remote: Arc<R>) -> Self {
        let change_log = Arc::new(ChangeLog::new(config.clock_skew_tolerance));
        Self::with_change_log(config, change_log, local, remote)
    }

    /// Creates a coordinator over an existing change log.
    pub fn with_change_log(
        config: SyncConfig,
        change_log: Arc<ChangeLog>,
        local: Arc<L>,
        remote: Arc<R>,
    ) -> Self {
        let resolver = ConflictResolver::from_policy(config.conflict_policy);
        Self {
            config,
            change_log,
            local,
            remote,
            detector: ConflictDetector::new(),
            resolver,
            status: SyncStatusStore::new(),
            checkpoints: RwLock::new(HashMap::new()),
            open_conflicts: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the configured policy with a custom strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn ResolutionStrategy>) -> Self {
        self.resolver = ConflictResolver::new(strategy);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the change log.
    pub fn change_log(&self) -> &Arc<ChangeLog> {
        &self.change_log
    }

    /// Returns the local store.
    pub fn local(&self) -> &Arc<L> {
        &self.local
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Returns the user's checkpoint.
    pub fn checkpoint(&self, user_id: &str) -> Checkpoint {
        self.checkpoints
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns conflicts left unresolved by the user's most recent session.
    pub fn open_conflicts(&self, user_id: &str) -> Vec<SyncConflict> {
        self.open_conflicts
            .lock()
            .get(user_id)
            .map(|open| open.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Queues local changes for the next session.
    ///
    /// All or nothing: the first invalid record fails the call with its
    /// index. Valid in every phase.
    pub fn queue_local_changes(&self, records: Vec<ChangeRecord>) -> SyncResult<usize> {
        self.change_log.append_batch(records)
    }

    /// Returns the user's status with a live pending count.
    pub fn get_sync_status(&self, user_id: &str) -> SyncStatus {
        let mut status = self.status.get(user_id);
        status.pending_changes = self.change_log.peek_count(user_id);
        status
    }

    /// Runs one sync session for the user.
    ///
    /// Pulls remote changes since the checkpoint, drains the change log,
    /// classifies and resolves every touched entity, then writes the
    /// outcomes to both stores. Cancellation is observed until Applying
    /// starts; an aborted session requeues what it drained and advances no
    /// checkpoint.
    pub fn sync_user_data(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let mut session = self.status.begin_session(user_id)?;
        self.open_conflicts.lock().remove(user_id);
        info!(
            user_id,
            strategy = self.resolver.strategy_name(),
            "sync session started"
        );

        if cancel.is_cancelled() {
            return Err(self.abort(session, Vec::new(), SyncError::Cancelled));
        }

        // Pulling
        let checkpoint = self.checkpoint(user_id);
        let changes = match self.remote.changes_since(user_id, checkpoint.cursor) {
            Ok(changes) => changes,
            Err(err) => return Err(self.abort(session, Vec::new(), err.into())),
        };
        let cursor = changes.cursor;
        let pulled: Vec<RemoteSnapshot> = changes
            .snapshots
            .into_iter()
            .filter(|s| {
                self.detector
                    .remote_changed(Some(s), checkpoint.entity(&s.entity_id))
            })
            .collect();
        let mut summary = SessionSummary {
            pulled: pulled.len() as u64,
            ..SessionSummary::default()
        };
        debug!(user_id, pulled = summary.pulled, cursor, "remote changes pulled");

        if cancel.is_cancelled() {
            return Err(self.abort(session, Vec::new(), SyncError::Cancelled));
        }

        // Detecting
        session.set_phase(SyncPhase::Detecting);
        let drained = self.change_log.drain(user_id);
        summary.drained = drained.len() as u64;
        let classified = match self.classify(user_id, &drained, pulled, &checkpoint) {
            Ok(classified) => classified,
            Err(err) => return Err(self.abort(session, drained, err)),
        };
        summary.conflicts = classified
            .values()
            .filter(|c| c.detection.is_conflict())
            .count() as u64;

        if cancel.is_cancelled() {
            return Err(self.abort(session, drained, SyncError::Cancelled));
        }

        // Resolving
        session.set_phase(SyncPhase::Resolving);
        let mut plans = Vec::with_capacity(classified.len());
        let mut unresolved = BTreeMap::new();
        let mut failed = BTreeSet::new();
        for (entity_id, Classified { remote, detection }) in classified {
            let plan = match detection {
                Detection::ApplyLocal(net) => Some(EntityPlan::local(net, remote)),
                Detection::ApplyRemote(snapshot) => Some(EntityPlan::remote(snapshot)),
                Detection::Agreement => remote.map(EntityPlan::remote),
                Detection::Conflict(conflict) => match self.resolver.resolve(&conflict) {
                    Resolution::Resolved(outcome) => {
                        summary.resolved += 1;
                        debug!(user_id, entity_id = %entity_id, outcome = outcome.name(), "conflict resolved");
                        Some(EntityPlan::resolved(&conflict, &outcome))
                    }
                    Resolution::NeedsManual(reason) => {
                        warn!(user_id, entity_id = %entity_id, %reason, "conflict left for manual resolution");
                        session.record(SyncIssue::UnresolvedConflict {
                            entity_type: conflict.entity_type,
                            entity_id: entity_id.clone(),
                            reason,
                        });
                        failed.insert(entity_id.clone());
                        let plan = EntityPlan::resolved(&conflict, &ConflictResolution::AcceptRemote);
                        unresolved.insert(entity_id, conflict);
                        Some(plan)
                    }
                },
            };
            plans.extend(plan);
        }

        if cancel.is_cancelled() {
            return Err(self.abort(session, drained, SyncError::Cancelled));
        }

        // Applying. Cancellation stops between entities; the checkpoint stays
        // put and the records of entities not yet written go back to the log.
        session.set_phase(SyncPhase::Applying);
        let mut next = checkpoint.clone();
        for (index, plan) in plans.iter().enumerate() {
            if cancel.is_cancelled() {
                let remaining: BTreeSet<&str> =
                    plans[index..].iter().map(|p| p.entity_id.as_str()).collect();
                let requeue = drained
                    .into_iter()
                    .filter(|r| remaining.contains(r.entity_id.as_str()))
                    .collect();
                return Err(self.abort(session, requeue, SyncError::Cancelled));
            }
            match self.apply_plan(user_id, plan, &mut summary) {
                Ok(remote) => self.observe(&mut next, &plan.entity_id, remote.as_ref()),
                Err(issue) => {
                    warn!(user_id, entity_id = %plan.entity_id, %issue, "entity not applied");
                    session.record(issue);
                    failed.insert(plan.entity_id.clone());
                }
            }
        }

        // A failed entity may sit behind the pulled cursor; keep the old one
        // so the next session pulls it again.
        next.cursor = if failed.is_empty() {
            cursor
        } else {
            checkpoint.cursor
        };
        self.checkpoints.write().insert(user_id.to_string(), next);
        if !unresolved.is_empty() {
            self.open_conflicts
                .lock()
                .insert(user_id.to_string(), unresolved);
        }

        let now = Timestamp::now();
        session.complete(summary, self.change_log.peek_count(user_id), now);
        info!(
            user_id,
            pulled = summary.pulled,
            drained = summary.drained,
            pushed = summary.pushed,
            applied_locally = summary.applied_locally,
            conflicts = summary.conflicts,
            failed = failed.len(),
            "sync session finished"
        );

        if failed.is_empty() {
            Ok(SyncReport {
                user_id: user_id.to_string(),
                summary,
                duration: start.elapsed(),
                last_sync_time: now,
            })
        } else {
            Err(SyncError::PartialFailure {
                entity_ids: failed.into_iter().collect(),
            })
        }
    }

    /// Runs a session, retrying retryable failures with backoff.
    pub fn sync_user_data_with_retry(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(user_id, attempt, ?delay, "retrying sync");
                std::thread::sleep(delay);
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
            }

            match self.sync_user_data(user_id, cancel) {
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    warn!(user_id, attempt, error = %err, "sync attempt failed");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Applies manual resolutions to conflicts left open by the most recent
    /// session.
    ///
    /// Every entity is validated before anything is written. Returns the
    /// number of entities applied.
    pub fn resolve_conflicts(
        &self,
        user_id: &str,
        resolutions: Vec<(SyncConflict, ConflictResolution)>,
    ) -> SyncResult<usize> {
        let mut guard = self.status.begin_manual(user_id)?;

        let plans: BTreeMap<String, EntityPlan> = {
            let open = self.open_conflicts.lock();
            let open = open.get(user_id);
            let mut plans = BTreeMap::new();
            for (conflict, resolution) in &resolutions {
                let stored = open
                    .and_then(|open| open.get(&conflict.entity_id))
                    .ok_or_else(|| SyncError::EntityNotInConflict {
                        entity_id: conflict.entity_id.clone(),
                    })?;
                plans.insert(
                    conflict.entity_id.clone(),
                    EntityPlan::resolved(stored, resolution),
                );
            }
            plans
        };

        let mut summary = SessionSummary::default();
        let mut applied = 0;
        let mut failed = Vec::new();
        for (entity_id, plan) in &plans {
            match self.apply_plan(user_id, plan, &mut summary) {
                Ok(remote) => {
                    {
                        let mut checkpoints = self.checkpoints.write();
                        let checkpoint = checkpoints.entry(user_id.to_string()).or_default();
                        self.observe(checkpoint, entity_id, remote.as_ref());
                    }
                    if let Some(open) = self.open_conflicts.lock().get_mut(user_id) {
                        open.remove(entity_id);
                    }
                    guard.remove_issues(|issue| issue.entity_id() == Some(entity_id.as_str()));
                    info!(user_id, entity_id = %entity_id, "conflict resolved manually");
                    applied += 1;
                }
                Err(issue) => {
                    warn!(user_id, entity_id = %entity_id, %issue, "manual resolution not applied");
                    guard.record(issue);
                    failed.push(entity_id.clone());
                }
            }
        }

        guard.release(self.change_log.peek_count(user_id));
        if failed.is_empty() {
            Ok(applied)
        } else {
            Err(SyncError::PartialFailure { entity_ids: failed })
        }
    }

    fn classify(
        &self,
        user_id: &str,
        drained: &[ChangeRecord],
        pulled: Vec<RemoteSnapshot>,
        checkpoint: &Checkpoint,
    ) -> SyncResult<BTreeMap<String, Classified>> {
        let mut local: BTreeMap<&str, Vec<ChangeRecord>> = BTreeMap::new();
        for record in drained {
            local
                .entry(record.entity_id.as_str())
                .or_default()
                .push(record.clone());
        }
        let mut remote: HashMap<String, RemoteSnapshot> = pulled
            .into_iter()
            .map(|s| (s.entity_id.clone(), s))
            .collect();

        let entity_ids: BTreeSet<String> = local
            .keys()
            .map(|id| id.to_string())
            .chain(remote.keys().cloned())
            .collect();

        let mut classified = BTreeMap::new();
        for entity_id in entity_ids {
            let net = local
                .get(entity_id.as_str())
                .and_then(|records| NetChange::collapse(records));
            let snapshot = match remote.remove(&entity_id) {
                Some(snapshot) => Some(snapshot),
                None if net.is_some() => self.remote.get_snapshot(user_id, &entity_id)?,
                None => None,
            };

            let detection = self.detector.detect(
                net.as_ref(),
                snapshot.as_ref(),
                checkpoint.entity(&entity_id),
            )?;
            debug!(user_id, entity_id = %entity_id, detection = detection.name(), "entity classified");
            classified.insert(
                entity_id,
                Classified {
                    remote: snapshot,
                    detection,
                },
            );
        }
        Ok(classified)
    }

    /// Writes one entity to the remote store, then the local store.
    ///
    /// Returns the remote snapshot after the writes.
    fn apply_plan(
        &self,
        user_id: &str,
        plan: &EntityPlan,
        summary: &mut SessionSummary,
    ) -> Result<Option<RemoteSnapshot>, SyncIssue> {
        let mut remote = plan.remote.clone();
        if !plan.target.matches(remote.as_ref()) {
            let write = plan.write_over(remote.as_ref());
            let version = self
                .remote
                .apply_change(user_id, &write)
                .map_err(|err| plan.issue(err))?;
            remote = Some(plan.written(version));
            summary.pushed += 1;
        }

        let local = self
            .local
            .get_snapshot(user_id, &plan.entity_id)
            .map_err(|err| plan.issue(err))?;
        if !plan.target.matches(local.as_ref()) {
            let write = plan.write_over(local.as_ref());
            self.local
                .apply_change(user_id, &write)
                .map_err(|err| plan.issue(err))?;
            summary.applied_locally += 1;
        }

        Ok(remote)
    }

    fn observe(&self, checkpoint: &mut Checkpoint, entity_id: &str, remote: Option<&RemoteSnapshot>) {
        let Some(snapshot) = remote else {
            return;
        };
        match EntityCheckpoint::observe(snapshot) {
            Ok(entity) => {
                checkpoint.entities.insert(entity_id.to_string(), entity);
            }
            Err(err) => {
                warn!(entity_id, error = %err, "checkpoint not advanced");
                checkpoint.entities.remove(entity_id);
            }
        }
    }

    fn abort(
        &self,
        session: SessionGuard<'_>,
        drained: Vec<ChangeRecord>,
        err: SyncError,
    ) -> SyncError {
        let user_id = session.user_id().to_string();
        self.change_log.requeue(&user_id, drained);

        let issue = match &err {
            SyncError::Cancelled => SyncIssue::Cancelled,
            SyncError::Transport { message, .. } => SyncIssue::Transport {
                message: message.clone(),
            },
            other => SyncIssue::Transport {
                message: other.to_string(),
            },
        };
        warn!(user_id = %user_id, error = %err, "sync session aborted");
        session.fail(issue, self.change_log.peek_count(&user_id));
        err
    }
}
