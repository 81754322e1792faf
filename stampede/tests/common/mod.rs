//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stampede::phase::{CompletionSignal, PhaseChange, PhaseChangeHandler, PhaseStatus};
use stampede::{RunReport, Runner, SchedulerResult, SessionCore};
use stampede_core::Clock;
use stampede_sim::SimEventLoopGroup;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

const MAX_ITERATIONS: usize = 1_000_000;

/// One runner tick, then advance virtual time to whatever comes first: the
/// runner's next deadline or the next queued task. Returns `false` once every
/// phase terminated.
pub fn step(sim: &SimEventLoopGroup, runner: &mut Runner) -> bool {
    let Some(delay) = runner.tick() else {
        return false;
    };
    let now = sim.now();
    let target = now + delay;
    let until = sim.next_deadline().map_or(target, |next| next.min(target)).max(now);
    sim.advance_to(until);
    true
}

/// Drive the runner until virtual time reaches `until` or the run ends.
/// Returns whether the run is still going.
pub fn run_until(sim: &SimEventLoopGroup, runner: &mut Runner, until: Duration) -> bool {
    let mut iterations = 0;
    while sim.now() < until {
        if !step(sim, runner) {
            return false;
        }
        iterations += 1;
        assert!(iterations < MAX_ITERATIONS, "runner did not make progress");
    }
    true
}

/// Drive the runner until every phase terminated, then complete statistics.
pub fn run_to_completion(
    sim: &SimEventLoopGroup,
    runner: &mut Runner,
    limit: Duration,
) -> RunReport {
    let mut iterations = 0;
    while step(sim, runner) {
        iterations += 1;
        assert!(iterations < MAX_ITERATIONS, "runner did not make progress");
        assert!(sim.now() <= limit, "benchmark still running at {:?}", sim.now());
    }
    sim.run_ready();
    assert!(runner.try_complete_stats(), "handler signals should be complete");
    runner.report()
}

/// Step that completes immediately.
pub fn noop(_: &mut SessionCore) -> SchedulerResult<bool> {
    Ok(true)
}

/// Step that never completes on its own.
pub fn blocked(_: &mut SessionCore) -> SchedulerResult<bool> {
    Ok(false)
}

/// Step counting how often it completed.
pub fn counter(
    count: Arc<AtomicUsize>,
) -> impl Fn(&mut SessionCore) -> SchedulerResult<bool> + Send + Sync {
    move |_: &mut SessionCore| -> SchedulerResult<bool> {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Every status transition with the virtual time it happened at.
#[derive(Clone, Default)]
pub struct Transitions {
    log: Arc<Mutex<Vec<(String, PhaseStatus, Duration)>>>,
}

impl Transitions {
    pub fn handler(&self, clock: Arc<dyn Clock>) -> Arc<dyn PhaseChangeHandler> {
        let log = self.log.clone();
        Arc::new(move |change: &PhaseChange| -> CompletionSignal {
            log.lock().push((change.phase.clone(), change.status, clock.now()));
            CompletionSignal::Complete
        })
    }

    pub fn statuses(&self, phase: &str) -> Vec<PhaseStatus> {
        self.log
            .lock()
            .iter()
            .filter(|(name, _, _)| name == phase)
            .map(|(_, status, _)| *status)
            .collect()
    }

    pub fn time_of(&self, phase: &str, status: PhaseStatus) -> Option<Duration> {
        self.log
            .lock()
            .iter()
            .find(|(name, s, _)| name == phase && *s == status)
            .map(|(_, _, at)| *at)
    }
}
