//! Cooperative cancellation.
//!
//! An [`AbortSignal`] is a shared flag plus a waker. Every turn receives one
//! composed from the caller's signal, the turn deadline and (for scheduled
//! runs) the task timeout; the runner and tool implementations check it at
//! each suspension point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    aborted: AtomicBool,
    notify: Notify,
}

/// Clonable cancellation handle. Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// A signal that fires after `duration`.
    pub fn timeout(duration: Duration) -> Self {
        let signal = Self::new();
        signal.abort_after(duration);
        signal
    }

    /// Fire the signal. Idempotent.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once the signal has fired (immediately if it already has).
    pub async fn aborted(&self) {
        loop {
            // Register interest before checking so an abort between the
            // check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    /// Arm a timer that fires this signal after `duration`.
    pub fn abort_after(&self, duration: Duration) {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            signal.abort();
        });
    }

    /// A signal that fires when any of `sources` fires.
    pub fn compose(sources: &[&AbortSignal]) -> Self {
        let composed = Self::new();
        for source in sources {
            if source.is_aborted() {
                composed.abort();
                return composed;
            }
            let source = (*source).clone();
            let child = composed.clone();
            tokio::spawn(async move {
                source.aborted().await;
                child.abort();
            });
        }
        composed
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_wakes_waiters() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.aborted().await;
            true
        });
        signal.abort();
        assert!(handle.await.unwrap());
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn already_aborted_resolves_immediately() {
        let signal = AbortSignal::new();
        signal.abort();
        signal.aborted().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_signal_fires_after_duration() {
        let signal = AbortSignal::timeout(Duration::from_secs(5));
        assert!(!signal.is_aborted());
        tokio::time::sleep(Duration::from_secs(6)).await;
        signal.aborted().await;
    }

    #[tokio::test]
    async fn composed_signal_fires_when_any_source_fires() {
        let a = AbortSignal::new();
        let b = AbortSignal::new();
        let composed = AbortSignal::compose(&[&a, &b]);
        assert!(!composed.is_aborted());

        b.abort();
        composed.aborted().await;
        assert!(!a.is_aborted());
    }

    #[tokio::test]
    async fn compose_with_already_fired_source() {
        let a = AbortSignal::new();
        a.abort();
        let composed = AbortSignal::compose(&[&a]);
        assert!(composed.is_aborted());
    }
}
