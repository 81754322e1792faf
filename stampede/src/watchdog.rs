//! Scheduling watchdog.
//!
//! A heartbeat task is scheduled on every executor at a fixed interval. When a
//! heartbeat runs later than its deadline by more than the threshold, the executor
//! was blocked (a step doing synchronous work, a starved thread) and every
//! session pinned to it saw that delay. Such a run no longer measures the
//! system under test, so the watchdog aborts it through the [`AbortHandle`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stampede_core::{Clock, EventExecutor, EventLoops};

use crate::runner::AbortHandle;

/// Watchdog settings; milliseconds in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogConfig {
    /// Time between heartbeats on each executor.
    #[serde(with = "crate::config::millis")]
    pub interval: Duration,
    /// Lateness that aborts the run.
    #[serde(with = "crate::config::millis")]
    pub threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            threshold: Duration::from_secs(1),
        }
    }
}

/// Running heartbeats; dropping the watchdog stops them.
pub struct Watchdog {
    stopped: Arc<AtomicBool>,
    executors: usize,
}

impl Watchdog {
    /// Start one heartbeat per executor of `loops`.
    pub fn start(loops: &EventLoops, config: WatchdogConfig, abort: AbortHandle) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        for executor in loops.iter() {
            let heartbeat = Arc::new(Heartbeat {
                executor: executor.clone(),
                clock: loops.clock().clone(),
                config,
                abort: abort.clone(),
                stopped: stopped.clone(),
            });
            heartbeat.arm();
        }
        tracing::debug!(
            "Watchdog probing {} executors every {:?} (threshold {:?})",
            loops.len(),
            config.interval,
            config.threshold
        );
        Self {
            stopped,
            executors: loops.len(),
        }
    }

    /// Stop the heartbeats. Heartbeats already queued run once more and exit.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("executors", &self.executors)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct Heartbeat {
    executor: Arc<dyn EventExecutor>,
    clock: Arc<dyn Clock>,
    config: WatchdogConfig,
    abort: AbortHandle,
    stopped: Arc<AtomicBool>,
}

impl Heartbeat {
    fn arm(self: Arc<Self>) {
        let deadline = self.clock.now() + self.config.interval;
        let heartbeat = self.clone();
        self.executor
            .schedule(self.config.interval, Box::new(move || heartbeat.fire(deadline)));
    }

    fn fire(self: Arc<Self>, deadline: Duration) {
        if self.stopped.load(Ordering::Acquire) || self.abort.is_aborted() {
            return;
        }
        let lateness = self.clock.now().saturating_sub(deadline);
        if lateness > self.config.threshold {
            self.abort.abort(format!(
                "executor {} was blocked for {:?} (threshold {:?})",
                self.executor.id(),
                lateness,
                self.config.threshold
            ));
            return;
        }
        if lateness > self.config.threshold / 2 {
            tracing::warn!("Executor {} is running {:?} late", self.executor.id(), lateness);
        }
        self.arm();
    }
}
