//! Phase-change notifications.

use std::fmt;

use tokio::sync::oneshot;

use crate::error::SchedulerError;
use crate::phase::PhaseStatus;

/// A phase status transition, as seen by a [`PhaseChangeHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseChange {
    /// Phase name.
    pub phase: String,
    /// Iteration number of the phase definition.
    pub iteration: u32,
    /// Status the phase moved to.
    pub status: PhaseStatus,
    /// Whether the phase ever ran out of sessions.
    pub session_limit_exceeded: bool,
    /// First error recorded on the phase.
    pub error: Option<SchedulerError>,
}

/// Receives every phase status transition.
///
/// The signal returned for a `Terminated` transition gates the phase's move to
/// `StatsComplete`; signals for other transitions are not awaited.
pub trait PhaseChangeHandler: Send + Sync {
    /// Handle one transition.
    fn on_phase_change(&self, change: &PhaseChange) -> CompletionSignal;
}

impl<F> PhaseChangeHandler for F
where
    F: Fn(&PhaseChange) -> CompletionSignal + Send + Sync,
{
    fn on_phase_change(&self, change: &PhaseChange) -> CompletionSignal {
        self(change)
    }
}

/// Handler that only traces transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl PhaseChangeHandler for LoggingHandler {
    fn on_phase_change(&self, change: &PhaseChange) -> CompletionSignal {
        tracing::debug!(
            "Phase `{}` is {} (session limit exceeded: {})",
            change.phase,
            change.status,
            change.session_limit_exceeded
        );
        CompletionSignal::Complete
    }
}

/// Tells the runner when a handler is done with a transition.
pub enum CompletionSignal {
    /// Nothing left to do.
    Complete,
    /// Done once the paired [`CompletionSender`] fires or is dropped.
    Pending(oneshot::Receiver<()>),
}

impl CompletionSignal {
    /// A pending signal and the sender that completes it.
    pub fn pending() -> (Self, CompletionSender) {
        let (tx, rx) = oneshot::channel();
        (CompletionSignal::Pending(rx), CompletionSender { tx })
    }

    /// Whether the signal completed, without waiting.
    pub fn is_complete(&mut self) -> bool {
        match self {
            CompletionSignal::Complete => true,
            CompletionSignal::Pending(rx) => {
                !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty))
            }
        }
    }

    /// Wait for completion.
    pub async fn wait(self) {
        if let CompletionSignal::Pending(rx) = self {
            // A dropped sender counts as completion.
            let _ = rx.await;
        }
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionSignal::Complete => f.write_str("Complete"),
            CompletionSignal::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Completes a [`CompletionSignal::Pending`].
#[derive(Debug)]
pub struct CompletionSender {
    tx: oneshot::Sender<()>,
}

impl CompletionSender {
    /// Mark the signal complete.
    pub fn complete(self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_completes_on_send_or_drop() {
        let (mut signal, sender) = CompletionSignal::pending();
        assert!(!signal.is_complete());
        sender.complete();
        assert!(signal.is_complete());

        let (mut dropped, sender) = CompletionSignal::pending();
        drop(sender);
        assert!(dropped.is_complete());
        assert!(CompletionSignal::Complete.is_complete());
    }

    #[tokio::test]
    async fn test_wait() {
        let (signal, sender) = CompletionSignal::pending();
        let waiter = tokio::spawn(signal.wait());
        sender.complete();
        waiter.await.expect("waiter finished");
    }
}
