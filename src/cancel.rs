/*!
 * Cooperative cancellation shared by every stage of a run.
 *
 * A token is cancelled either explicitly or when its deadline passes. Clones
 * share state, so cancelling one cancels all of them.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancel signal with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Token that only cancels when asked to
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also cancels once `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Clone sharing the cancel flag, tightened to the earlier deadline
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            inner: Arc::clone(&self.inner),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the token is cancelled or its deadline passes
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => return,
                    }
                }
                None => notified.await,
            }
        }
    }
}
