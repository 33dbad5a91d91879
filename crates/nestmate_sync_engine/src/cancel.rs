//! Caller-supplied cancellation for sync sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation signal for one `sync_user_data` call.
///
/// Clones share the same flag, so a token can be handed to the session and
/// cancelled from another thread. An optional deadline cancels implicitly.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Creates a token that is never cancelled unless `cancel` is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that cancels at the given instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Creates a token that cancels after the given duration.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn deadline_cancels() {
        let past = CancellationToken::with_deadline(Instant::now());
        assert!(past.is_cancelled());

        let future = CancellationToken::with_timeout(Duration::from_secs(3600));
        assert!(!future.is_cancelled());
    }
}
