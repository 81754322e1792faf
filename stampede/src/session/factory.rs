use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stampede_core::EventLoops;

use crate::error::SchedulerResult;
use crate::scenario::Scenario;
use crate::session::Session;
use crate::stats::StatisticsRegistry;

/// Creates the sessions of one resource group and remembers all of them.
///
/// Phases walk the registry on termination to wake sessions that are blocked
/// on external work.
#[derive(Debug)]
pub struct SessionFactory {
    group: Arc<str>,
    scenario: Arc<Scenario>,
    loops: EventLoops,
    statistics: Arc<StatisticsRegistry>,
    ids: Arc<AtomicUsize>,
    sessions: Mutex<Vec<Session>>,
}

impl SessionFactory {
    /// Factory drawing session ids from `ids`.
    pub fn new(
        group: impl Into<Arc<str>>,
        scenario: Arc<Scenario>,
        loops: EventLoops,
        statistics: Arc<StatisticsRegistry>,
        ids: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            group: group.into(),
            scenario,
            loops,
            statistics,
            ids,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Resource group key.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Scenario every session runs.
    pub fn scenario(&self) -> &Arc<Scenario> {
        &self.scenario
    }

    /// Executors sessions are spread over.
    pub fn loops(&self) -> &EventLoops {
        &self.loops
    }

    /// Create a session on the next executor in round-robin order.
    pub fn create(&self) -> SchedulerResult<Session> {
        let executor = self.loops.next().id();
        self.create_on(executor)
    }

    /// Create a session pinned to `executor` (wrapping around the group size).
    pub fn create_on(&self, executor: usize) -> SchedulerResult<Session> {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(
            id,
            self.group.clone(),
            self.loops.executor(executor).clone(),
            self.loops.clock().clone(),
            self.scenario.clone(),
            self.statistics.clone(),
        )?;
        tracing::trace!(
            "Created session {} on executor {} for group `{}`",
            id,
            session.executor_id(),
            self.group
        );
        self.sessions.lock().push(session.clone());
        Ok(session)
    }

    /// Every session created so far.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().clone()
    }

    /// Number of sessions created so far.
    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }
}
