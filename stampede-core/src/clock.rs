//! Clock abstraction for real and virtual time.

use std::fmt;
use std::time::{Duration, Instant};

/// Monotonic time source shared by every executor of a group.
///
/// `now()` returns the time elapsed since the clock's epoch. Phases record
/// their absolute start as a `now()` reading and measure everything else
/// relative to it, so the epoch itself carries no meaning.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    /// Convenience for `now()` in nanoseconds, saturating at `u64::MAX`.
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.now().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Wall-clock time measured from the moment the clock was created.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start_time: Instant,
}

impl SystemClock {
    /// Create a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl fmt::Display for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system clock (+{:?})", self.now())
    }
}
