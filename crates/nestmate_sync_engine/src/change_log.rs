//! Per-user log of local changes awaiting sync.

use crate::error::{SyncError, SyncResult};
use nestmate_sync_protocol::{decode_changes, encode_changes, ChangeRecord, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct UserLog {
    /// Pending records keyed by their total order.
    pending: BTreeMap<(Timestamp, Uuid), ChangeRecord>,
    /// Newest timestamp ever appended for this user. Survives drains.
    high_water: Option<Timestamp>,
}

impl UserLog {
    fn insert(&mut self, record: ChangeRecord) {
        let ts = record.local_timestamp;
        self.high_water = Some(self.high_water.map_or(ts, |hw| hw.max(ts)));
        self.pending.insert(record.order_key(), record);
    }
}

/// An ordered buffer of pending local mutations, one queue per user.
///
/// # Invariants
///
/// - Records of one user drain in ascending `(local_timestamp, id)` order
/// - `append` and `drain` for the same user are mutually exclusive
/// - Different users never contend on the same lock
/// - A record older than the user's newest record by more than the
///   clock-skew tolerance is rejected
pub struct ChangeLog {
    users: RwLock<HashMap<String, Arc<Mutex<UserLog>>>>,
    clock_skew_tolerance: Duration,
}

impl ChangeLog {
    /// Creates an empty change log.
    pub fn new(clock_skew_tolerance: Duration) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            clock_skew_tolerance,
        }
    }

    /// Returns the configured clock-skew tolerance.
    pub fn clock_skew_tolerance(&self) -> Duration {
        self.clock_skew_tolerance
    }

    fn user_log(&self, user_id: &str) -> Arc<Mutex<UserLog>> {
        if let Some(log) = self.users.read().get(user_id) {
            return Arc::clone(log);
        }
        Arc::clone(self.users.write().entry(user_id.to_string()).or_default())
    }

    /// Appends one record.
    ///
    /// Returns the user's pending count after the append.
    pub fn append(&self, record: ChangeRecord) -> SyncResult<usize> {
        validate_shape(0, &record)?;

        let log = self.user_log(&record.user_id);
        let mut log = log.lock();
        self.check_skew(0, &record, log.high_water)?;

        debug!(
            user_id = %record.user_id,
            entity_id = %record.entity_id,
            operation = %record.operation,
            "change appended"
        );
        log.insert(record);
        Ok(log.pending.len())
    }

    /// Appends a batch of records, all or nothing.
    ///
    /// The whole batch is validated against the current log state first; the
    /// first invalid record fails the call with its index and nothing is
    /// appended. Returns the number of records accepted.
    pub fn append_batch(&self, records: Vec<ChangeRecord>) -> SyncResult<usize> {
        for (index, record) in records.iter().enumerate() {
            validate_shape(index, record)?;
        }

        // Lock every involved user in name order so concurrent batches
        // cannot deadlock.
        let mut user_ids: Vec<&str> = records.iter().map(|r| r.user_id.as_str()).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let logs: Vec<(String, Arc<Mutex<UserLog>>)> = user_ids
            .iter()
            .map(|user_id| (user_id.to_string(), self.user_log(user_id)))
            .collect();
        let mut guards: HashMap<&str, _> = logs
            .iter()
            .map(|(user_id, log)| (user_id.as_str(), log.lock()))
            .collect();

        let mut high_water: HashMap<&str, Option<Timestamp>> = guards
            .iter()
            .map(|(user_id, log)| (*user_id, log.high_water))
            .collect();
        for (index, record) in records.iter().enumerate() {
            if let Some(hw) = high_water.get_mut(record.user_id.as_str()) {
                self.check_skew(index, record, *hw)?;
                let ts = record.local_timestamp;
                *hw = Some(hw.map_or(ts, |current| current.max(ts)));
            }
        }

        let count = records.len();
        for record in records {
            if let Some(log) = guards.get_mut(record.user_id.as_str()) {
                log.insert(record);
            }
        }
        debug!(count, "change batch appended");
        Ok(count)
    }

    /// Removes and returns every pending record of the user, oldest first.
    ///
    /// A concurrent second drain for the same user observes an empty log.
    pub fn drain(&self, user_id: &str) -> Vec<ChangeRecord> {
        let log = self.user_log(user_id);
        let drained: Vec<ChangeRecord> = std::mem::take(&mut log.lock().pending)
            .into_values()
            .collect();
        debug!(user_id, count = drained.len(), "change log drained");
        drained
    }

    /// Returns the user's pending count without mutating the log.
    pub fn peek_count(&self, user_id: &str) -> usize {
        self.users
            .read()
            .get(user_id)
            .map_or(0, |log| log.lock().pending.len())
    }

    /// Puts drained records back, e.g. after an aborted session.
    ///
    /// Requeued records skip the skew check; they were valid when appended.
    pub fn requeue(&self, user_id: &str, records: Vec<ChangeRecord>) {
        if records.is_empty() {
            return;
        }
        let count = records.len();
        let log = self.user_log(user_id);
        let mut log = log.lock();
        for record in records {
            log.insert(record);
        }
        debug!(user_id, count, "changes requeued");
    }

    /// Returns every user that has ever queued a change.
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.users.read().keys().cloned().collect();
        users.sort();
        users
    }

    /// Encodes all pending records as a CBOR change batch.
    pub fn snapshot(&self) -> SyncResult<Vec<u8>> {
        let logs: Vec<Arc<Mutex<UserLog>>> = {
            let users = self.users.read();
            let mut names: Vec<&String> = users.keys().collect();
            names.sort();
            names.into_iter().map(|name| Arc::clone(&users[name])).collect()
        };
        let records: Vec<ChangeRecord> = logs
            .iter()
            .flat_map(|log| log.lock().pending.values().cloned().collect::<Vec<_>>())
            .collect();
        Ok(encode_changes(&records)?)
    }

    /// Rebuilds a change log from a [`ChangeLog::snapshot`].
    pub fn restore(bytes: &[u8], clock_skew_tolerance: Duration) -> SyncResult<Self> {
        let log = Self::new(clock_skew_tolerance);
        for record in decode_changes(bytes)? {
            log.user_log(&record.user_id).lock().insert(record);
        }
        Ok(log)
    }

    fn check_skew(
        &self,
        index: usize,
        record: &ChangeRecord,
        high_water: Option<Timestamp>,
    ) -> SyncResult<()> {
        if let Some(hw) = high_water {
            if record.local_timestamp < hw.saturating_sub(self.clock_skew_tolerance) {
                return Err(SyncError::invalid_change(
                    index,
                    format!(
                        "timestamp {} precedes last queued change {} by more than {:?}",
                        record.local_timestamp, hw, self.clock_skew_tolerance
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}

fn validate_shape(index: usize, record: &ChangeRecord) -> SyncResult<()> {
    if record.user_id.trim().is_empty() {
        return Err(SyncError::invalid_change(index, "missing user_id"));
    }
    if record.entity_id.trim().is_empty() {
        return Err(SyncError::invalid_change(index, "missing entity_id"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestmate_sync_protocol::{EntityType, Payload};

    fn update(user: &str, entity: &str, ts: u64) -> ChangeRecord {
        ChangeRecord::update(
            user,
            EntityType::Task,
            entity,
            Payload::new().with("ts", i64::try_from(ts).unwrap()),
            Timestamp::from_millis(ts),
        )
    }

    #[test]
    fn append_counts_per_user() {
        let log = ChangeLog::default();
        assert_eq!(log.append(update("u1", "t1", 10)).unwrap(), 1);
        assert_eq!(log.append(update("u1", "t2", 11)).unwrap(), 2);
        assert_eq!(log.append(update("u2", "t1", 12)).unwrap(), 1);

        assert_eq!(log.peek_count("u1"), 2);
        assert_eq!(log.peek_count("u2"), 1);
        assert_eq!(log.peek_count("nobody"), 0);
        assert_eq!(log.users(), vec!["u1".to_string(), "u2".to_string()]);
    }

    #[test]
    fn drain_orders_by_timestamp_then_id() {
        let log = ChangeLog::new(Duration::from_millis(1_000));
        log.append(update("u1", "a", 300)).unwrap();
        log.append(update("u1", "b", 100)).unwrap();
        log.append(update("u1", "c", 200)).unwrap();

        let drained = log.drain("u1");
        let order: Vec<&str> = drained.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert!(drained.windows(2).all(|w| w[0].order_key() < w[1].order_key()));

        assert_eq!(log.peek_count("u1"), 0);
        assert!(log.drain("u1").is_empty());
    }

    #[test]
    fn rejects_missing_fields() {
        let log = ChangeLog::default();
        let err = log.append(update("", "t1", 1)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidChange { index: 0, .. }));

        let err = log.append(update("u1", " ", 1)).unwrap_err();
        assert!(err.to_string().contains("entity_id"));
        assert_eq!(log.peek_count("u1"), 0);
    }

    #[test]
    fn rejects_stale_replay_beyond_tolerance() {
        let log = ChangeLog::new(Duration::from_millis(50));
        log.append(update("u1", "t1", 1_000)).unwrap();

        // Within tolerance
        log.append(update("u1", "t2", 960)).unwrap();

        let err = log.append(update("u1", "t3", 900)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidChange { index: 0, .. }));

        // The high-water mark survives a drain
        log.drain("u1");
        assert!(log.append(update("u1", "t3", 900)).is_err());

        // Other users are unaffected
        log.append(update("u2", "t1", 1)).unwrap();
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let log = ChangeLog::new(Duration::from_millis(10));
        let batch = vec![
            update("u1", "t1", 100),
            update("u1", "t2", 200),
            update("u1", "t3", 50),
        ];

        let err = log.append_batch(batch).unwrap_err();
        assert!(matches!(err, SyncError::InvalidChange { index: 2, .. }));
        assert_eq!(log.peek_count("u1"), 0);

        let accepted = log
            .append_batch(vec![update("u1", "t1", 100), update("u2", "t1", 5)])
            .unwrap();
        assert_eq!(accepted, 2);
        assert_eq!(log.peek_count("u1"), 1);
        assert_eq!(log.peek_count("u2"), 1);
    }

    #[test]
    fn batch_reports_shape_errors_by_index() {
        let log = ChangeLog::default();
        let err = log
            .append_batch(vec![update("u1", "t1", 1), update("u1", "", 2)])
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidChange { index: 1, .. }));
    }

    #[test]
    fn requeue_restores_order() {
        let log = ChangeLog::default();
        log.append(update("u1", "a", 10)).unwrap();
        log.append(update("u1", "b", 20)).unwrap();
        let drained = log.drain("u1");

        log.append(update("u1", "c", 30)).unwrap();
        log.requeue("u1", drained);

        let order: Vec<String> = log.drain("u1").into_iter().map(|r| r.entity_id).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn snapshot_restore() {
        let log = ChangeLog::default();
        log.append(update("u1", "a", 10)).unwrap();
        log.append(update("u2", "b", 20)).unwrap();

        let bytes = log.snapshot().unwrap();
        let restored = ChangeLog::restore(&bytes, Duration::from_millis(1)).unwrap();

        assert_eq!(restored.peek_count("u1"), 1);
        assert_eq!(restored.peek_count("u2"), 1);
        assert!(restored.append(update("u1", "c", 5)).is_err());
        assert_eq!(restored.drain("u2")[0].entity_id, "b");
    }
}
