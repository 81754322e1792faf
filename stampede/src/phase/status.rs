use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle of a phase. Statuses are ordered and only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum PhaseStatus {
    /// Waiting for its start time and dependencies.
    NotStarted = 0,
    /// Creating sessions.
    Running = 1,
    /// No longer creating sessions; running ones may complete.
    Finished = 2,
    /// Sessions are being drained.
    Terminating = 3,
    /// No session is active and none can start.
    Terminated = 4,
    /// The phase-change handler acknowledged termination.
    StatsComplete = 5,
}

impl PhaseStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PhaseStatus::NotStarted,
            1 => PhaseStatus::Running,
            2 => PhaseStatus::Finished,
            3 => PhaseStatus::Terminating,
            4 => PhaseStatus::Terminated,
            _ => PhaseStatus::StatsComplete,
        }
    }

    /// Whether `start()` was called.
    pub fn is_started(self) -> bool {
        self >= PhaseStatus::Running
    }

    /// Whether the phase stopped creating new sessions.
    pub fn is_finished(self) -> bool {
        self >= PhaseStatus::Finished
    }

    /// Whether sessions must drain.
    pub fn is_terminating(self) -> bool {
        self >= PhaseStatus::Terminating
    }

    /// Whether every session is gone.
    pub fn is_terminated(self) -> bool {
        self >= PhaseStatus::Terminated
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseStatus::NotStarted => "NOT_STARTED",
            PhaseStatus::Running => "RUNNING",
            PhaseStatus::Finished => "FINISHED",
            PhaseStatus::Terminating => "TERMINATING",
            PhaseStatus::Terminated => "TERMINATED",
            PhaseStatus::StatsComplete => "STATS_COMPLETE",
        };
        f.write_str(name)
    }
}

/// Atomic, forward-only [`PhaseStatus`].
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PhaseStatus::NotStarted as u8))
    }

    pub(crate) fn load(&self) -> PhaseStatus {
        PhaseStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if that is strictly later than the current status.
    ///
    /// Returns the previous status, or the current one as the error when the
    /// move would not go forward.
    pub(crate) fn advance(&self, to: PhaseStatus) -> Result<PhaseStatus, PhaseStatus> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < to as u8).then_some(to as u8)
            })
            .map(PhaseStatus::from_u8)
            .map_err(PhaseStatus::from_u8)
    }

    /// Move from exactly `from` to `to`.
    pub(crate) fn transition(&self, from: PhaseStatus, to: PhaseStatus) -> Result<(), PhaseStatus> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PhaseStatus::from_u8)
    }
}
