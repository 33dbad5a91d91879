//! Concurrent stress helpers.
//!
//! Drive the change log and coordinator from several threads at once.

use nestmate_sync_engine::{
    CancellationToken, ChangeLog, EntityStore, RemoteChangeSource, SyncCoordinator, SyncError,
};
use nestmate_sync_protocol::{ChangeRecord, EntityType, Payload, Timestamp};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            duration,
        }
    }

    /// Operations per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }
}

/// Queues `per_thread` records from each of `threads` threads while the
/// same number of threads drain, and returns every drained record ID.
///
/// Panics if any record is drained twice.
pub fn stress_append_and_drain(
    log: Arc<ChangeLog>,
    user_id: &'static str,
    threads: usize,
    per_thread: usize,
) -> Vec<Uuid> {
    let barrier = Arc::new(Barrier::new(threads * 2));

    let writers: Vec<_> = (0..threads)
        .map(|t| {
            let log = Arc::clone(&log);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let record = ChangeRecord::update(
                        user_id,
                        EntityType::Note,
                        format!("n-{t}-{i}"),
                        Payload::new().with("body", format!("{t}:{i}")),
                        Timestamp::from_millis((t * per_thread + i) as u64),
                    );
                    log.append(record).expect("append rejected");
                }
            })
        })
        .collect();

    let drainers: Vec<_> = (0..threads)
        .map(|_| {
            let log = Arc::clone(&log);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut ids = Vec::new();
                for _ in 0..per_thread {
                    ids.extend(log.drain(user_id).into_iter().map(|r| r.id));
                }
                ids
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer panicked");
    }
    let mut drained: Vec<Uuid> = drainers
        .into_iter()
        .flat_map(|d| d.join().expect("drainer panicked"))
        .collect();
    drained.extend(log.drain(user_id).into_iter().map(|r| r.id));

    let unique: HashSet<&Uuid> = drained.iter().collect();
    assert_eq!(unique.len(), drained.len(), "record drained twice");
    drained
}

/// Starts `threads` sessions for the same user at once.
///
/// Counts sessions that ran against sessions rejected with
/// `SyncAlreadyInProgress`; any other error counts as failed too.
pub fn stress_concurrent_sessions<L, R>(
    coordinator: Arc<SyncCoordinator<L, R>>,
    user_id: &'static str,
    threads: usize,
) -> (StressTestResult, usize)
where
    L: EntityStore + 'static,
    R: EntityStore + RemoteChangeSource + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));
    let successful = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            let successful = Arc::clone(&successful);
            let rejected = Arc::clone(&rejected);
            let failed = Arc::clone(&failed);
            thread::spawn(move || {
                barrier.wait();
                match coordinator.sync_user_data(user_id, &CancellationToken::new()) {
                    Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                    Err(SyncError::SyncAlreadyInProgress { .. }) => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                        failed.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                };
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("session thread panicked");
    }

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    (result, rejected.load(Ordering::Relaxed))
}
