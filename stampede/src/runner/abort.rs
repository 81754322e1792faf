use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct AbortInner {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

/// The single channel for fatal conditions of a run.
///
/// Any component holding a clone may abort the run; the first reason wins.
/// The runner terminates every phase and returns
/// [`SchedulerError::Aborted`](crate::error::SchedulerError::Aborted).
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

impl AbortHandle {
    /// Create a handle that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the run. Returns `false` if it was already aborted.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut slot = self.inner.reason.lock();
            if let Some(first) = slot.as_ref() {
                tracing::debug!("Ignoring abort `{}`, already aborted: {}", reason, first);
                return false;
            }
            tracing::error!("Aborting run: {}", reason);
            *slot = Some(reason);
        }
        self.inner.token.cancel();
        true
    }

    /// Whether [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Reason given by the first abort.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Resolves once the run is aborted.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let handle = AbortHandle::new();
        let other = handle.clone();
        assert!(!handle.is_aborted());
        assert!(other.abort("executor 1 stalled"));
        assert!(!handle.abort("second"));
        assert!(handle.is_aborted());
        assert_eq!(handle.reason().as_deref(), Some("executor 1 stalled"));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_abort() {
        let handle = AbortHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };
        handle.abort("stop");
        waiter.await.expect("waiter finished");
    }
}
