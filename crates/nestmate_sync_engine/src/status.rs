//! Per-user sync status store.

use crate::error::{SyncError, SyncResult};
use nestmate_sync_protocol::{SessionSummary, SyncIssue, SyncPhase, SyncStatus, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Process-wide, per-user sync status.
///
/// Readers get clones. Writes go through a [`SessionGuard`], at most one per
/// user at a time.
#[derive(Debug, Default)]
pub struct SyncStatusStore {
    users: RwLock<HashMap<String, SyncStatus>>,
}

impl SyncStatusStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user's status; zero state for unknown users.
    pub fn get(&self, user_id: &str) -> SyncStatus {
        self.users.read().get(user_id).cloned().unwrap_or_default()
    }

    /// Starts a sync session for the user.
    ///
    /// Fails fast if a session or manual resolution is already running.
    /// Clears the previous session's errors.
    pub fn begin_session(&self, user_id: &str) -> SyncResult<SessionGuard<'_>> {
        self.begin(user_id, true)
    }

    /// Starts a manual resolution for the user.
    ///
    /// Holds the same per-user exclusion as a session but keeps the current
    /// errors so resolved entries can be removed one by one.
    pub fn begin_manual(&self, user_id: &str) -> SyncResult<SessionGuard<'_>> {
        self.begin(user_id, false)
    }

    fn begin(&self, user_id: &str, session: bool) -> SyncResult<SessionGuard<'_>> {
        let mut users = self.users.write();
        let status = users.entry(user_id.to_string()).or_default();
        if status.sync_in_progress {
            return Err(SyncError::SyncAlreadyInProgress {
                user_id: user_id.to_string(),
            });
        }

        let previous_phase = status.phase;
        status.sync_in_progress = true;
        if session {
            status.errors.clear();
            status.phase = SyncPhase::Pulling;
        } else {
            status.phase = SyncPhase::Applying;
        }

        Ok(SessionGuard {
            store: self,
            user_id: user_id.to_string(),
            drop_phase: if session {
                SyncPhase::Failed
            } else {
                previous_phase
            },
            finished: false,
        })
    }

    fn update<F: FnOnce(&mut SyncStatus)>(&self, user_id: &str, f: F) {
        let mut users = self.users.write();
        f(users.entry(user_id.to_string()).or_default());
    }
}

/// Exclusive write access to one user's status.
///
/// Dropping an unfinished guard clears `sync_in_progress`, so a panicking
/// store cannot leave the user locked out.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    store: &'a SyncStatusStore,
    user_id: String,
    drop_phase: SyncPhase,
    finished: bool,
}

impl SessionGuard<'_> {
    /// Returns the user this guard belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Moves to a new phase.
    pub fn set_phase(&mut self, phase: SyncPhase) {
        debug!(user_id = %self.user_id, %phase, "sync phase");
        self.store.update(&self.user_id, |status| status.phase = phase);
    }

    /// Appends an issue to the user's errors.
    pub fn record(&mut self, issue: SyncIssue) {
        self.store.update(&self.user_id, |status| status.errors.push(issue));
    }

    /// Removes every issue matching the predicate.
    pub fn remove_issues<F: Fn(&SyncIssue) -> bool>(&mut self, predicate: F) {
        self.store
            .update(&self.user_id, |status| status.errors.retain(|issue| !predicate(issue)));
    }

    /// Ends a session that ran to completion.
    pub fn complete(mut self, summary: SessionSummary, pending_changes: usize, at: Timestamp) {
        self.store.update(&self.user_id, |status| {
            status.sync_in_progress = false;
            status.phase = SyncPhase::Idle;
            status.last_sync_time = Some(at);
            status.pending_changes = pending_changes;
            status.last_session = summary;
        });
        self.finished = true;
    }

    /// Ends an aborted session. `last_sync_time` is left unchanged.
    pub fn fail(mut self, issue: SyncIssue, pending_changes: usize) {
        self.store.update(&self.user_id, |status| {
            status.sync_in_progress = false;
            status.phase = SyncPhase::Failed;
            status.pending_changes = pending_changes;
            status.errors.push(issue);
        });
        self.finished = true;
    }

    /// Ends a manual resolution.
    pub fn release(mut self, pending_changes: usize) {
        let phase = self.drop_phase;
        self.store.update(&self.user_id, |status| {
            status.sync_in_progress = false;
            status.phase = phase;
            status.pending_changes = pending_changes;
        });
        self.finished = true;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let phase = self.drop_phase;
            self.store.update(&self.user_id, |status| {
                status.sync_in_progress = false;
                status.phase = phase;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestmate_sync_protocol::EntityType;

    fn conflict_issue(entity_id: &str) -> SyncIssue {
        SyncIssue::UnresolvedConflict {
            entity_type: EntityType::Note,
            entity_id: entity_id.into(),
            reason: "manual".into(),
        }
    }

    #[test]
    fn unknown_user_has_zero_state() {
        let store = SyncStatusStore::new();
        let status = store.get("nobody");
        assert_eq!(status, SyncStatus::default());
        assert!(status.last_sync_time.is_none());
        assert!(!status.sync_in_progress);
    }

    #[test]
    fn session_lifecycle() {
        let store = SyncStatusStore::new();
        let mut guard = store.begin_session("u1").unwrap();
        assert!(store.get("u1").sync_in_progress);
        assert_eq!(store.get("u1").phase, SyncPhase::Pulling);

        guard.set_phase(SyncPhase::Applying);
        guard.record(conflict_issue("n1"));
        assert_eq!(store.get("u1").phase, SyncPhase::Applying);

        let summary = SessionSummary {
            pulled: 2,
            ..SessionSummary::default()
        };
        guard.complete(summary, 4, Timestamp::from_millis(99));

        let status = store.get("u1");
        assert!(!status.sync_in_progress);
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.last_sync_time, Some(Timestamp::from_millis(99)));
        assert_eq!(status.pending_changes, 4);
        assert_eq!(status.errors, vec![conflict_issue("n1")]);
        assert_eq!(status.last_session, summary);
    }

    #[test]
    fn second_session_is_rejected() {
        let store = SyncStatusStore::new();
        let _guard = store.begin_session("u1").unwrap();

        assert!(matches!(
            store.begin_session("u1"),
            Err(SyncError::SyncAlreadyInProgress { .. })
        ));
        assert!(matches!(
            store.begin_manual("u1"),
            Err(SyncError::SyncAlreadyInProgress { .. })
        ));

        // Other users are independent
        assert!(store.begin_session("u2").is_ok());
    }

    #[test]
    fn new_session_clears_errors() {
        let store = SyncStatusStore::new();
        let mut guard = store.begin_session("u1").unwrap();
        guard.record(conflict_issue("n1"));
        guard.complete(SessionSummary::default(), 0, Timestamp::from_millis(1));
        assert_eq!(store.get("u1").errors.len(), 1);

        let guard = store.begin_session("u1").unwrap();
        assert!(store.get("u1").errors.is_empty());
        drop(guard);
    }

    #[test]
    fn failed_session_keeps_last_sync_time() {
        let store = SyncStatusStore::new();
        store
            .begin_session("u1")
            .unwrap()
            .complete(SessionSummary::default(), 0, Timestamp::from_millis(5));

        store.begin_session("u1").unwrap().fail(
            SyncIssue::Transport {
                message: "offline".into(),
            },
            3,
        );

        let status = store.get("u1");
        assert_eq!(status.phase, SyncPhase::Failed);
        assert_eq!(status.last_sync_time, Some(Timestamp::from_millis(5)));
        assert_eq!(status.pending_changes, 3);
        assert_eq!(status.errors.len(), 1);
    }

    #[test]
    fn dropped_guard_releases_user() {
        let store = SyncStatusStore::new();
        {
            let _guard = store.begin_session("u1").unwrap();
        }
        let status = store.get("u1");
        assert!(!status.sync_in_progress);
        assert_eq!(status.phase, SyncPhase::Failed);
        assert!(store.begin_session("u1").is_ok());
    }

    #[test]
    fn manual_guard_keeps_errors_and_phase() {
        let store = SyncStatusStore::new();
        let mut guard = store.begin_session("u1").unwrap();
        guard.record(conflict_issue("n1"));
        guard.record(conflict_issue("n2"));
        guard.complete(SessionSummary::default(), 0, Timestamp::from_millis(1));

        let mut manual = store.begin_manual("u1").unwrap();
        assert_eq!(store.get("u1").errors.len(), 2);
        manual.remove_issues(|issue| issue.entity_id() == Some("n1"));
        manual.release(0);

        let status = store.get("u1");
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.errors, vec![conflict_issue("n2")]);

        // Dropping a manual guard restores the previous phase
        drop(store.begin_manual("u1").unwrap());
        assert_eq!(store.get("u1").phase, SyncPhase::Idle);
    }
}
