//! Cooperative cancellation token threaded through a conversion request.
//!
//! One token is created per request and shared (cheaply cloned) by the disk
//! copy loop, every converter probe, parallel tier siblings, and the URL
//! download. Cancellation is cooperative: holders check [`CancelToken::is_cancelled`]
//! at loop iterations or await [`CancelToken::cancelled`] in a `select!`.
//! Nothing is preempted — a converter that never checks simply runs until its
//! next await point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared cancellation flag for one conversion request.
///
/// Clones observe the same underlying flag. Cancelling is idempotent.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    ///
    /// Safe to call from multiple tasks concurrently; already-cancelled
    /// tokens resolve immediately.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            // Re-check after registering to avoid a lost-wakeup race.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Map a cancelled token to `Err(ConvertError::Cancelled)`.
    pub fn check(&self) -> Result<(), crate::error::ConvertError> {
        if self.is_cancelled() {
            Err(crate::error::ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
