use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stampede_core::{EventExecutor, EventLoops, SeededRandom};
use tokio::sync::Notify;

use super::active::{ActiveSessions, ActiveState};
use super::handler::{CompletionSignal, PhaseChange, PhaseChangeHandler};
use super::model::{Model, OpenModel};
use super::status::{PhaseStatus, StatusCell};
use crate::config::PhaseDefinition;
use crate::error::{SchedulerError, SchedulerResult};
use crate::session::Session;
use crate::shared::SharedResources;

/// Callback invoked whenever a phase finds its session pool empty.
pub type ExhaustionHook = Arc<dyn Fn(&PhaseInstance) + Send + Sync>;

const NOT_STARTED: u64 = u64::MAX;

/// Result of asking a phase for one more session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    Started,
    /// No session was available; the slot was given back.
    Exhausted,
    /// The phase no longer admits sessions.
    Closed,
}

/// Collaborators every phase of a run shares.
#[derive(Clone)]
pub(crate) struct PhaseContext {
    pub(crate) loops: EventLoops,
    pub(crate) handler: Arc<dyn PhaseChangeHandler>,
    pub(crate) exhaustion_hook: Option<ExhaustionHook>,
    pub(crate) wake: Arc<Notify>,
}

/// Runtime state of one phase.
///
/// Status transitions may be requested from any thread: the runner finishes
/// and terminates phases, sessions report completions from their executors,
/// and open-model ticks run on the phase's own executor.
pub struct PhaseInstance {
    id: usize,
    definition: Arc<PhaseDefinition>,
    status: StatusCell,
    active: ActiveSessions,
    start_nanos: AtomicU64,
    error: Mutex<Option<SchedulerError>>,
    session_limit_exceeded: AtomicBool,
    resources: Arc<SharedResources>,
    context: PhaseContext,
    completion: Mutex<Option<CompletionSignal>>,
    model: Model,
}

impl PhaseInstance {
    pub(crate) fn new(
        id: usize,
        definition: Arc<PhaseDefinition>,
        resources: Arc<SharedResources>,
        context: PhaseContext,
        random: SeededRandom,
    ) -> Arc<Self> {
        let model = Model::from_config(&definition.model, definition.effective_duration(), random);
        Arc::new(Self {
            id,
            definition,
            status: StatusCell::new(),
            active: ActiveSessions::default(),
            start_nanos: AtomicU64::new(NOT_STARTED),
            error: Mutex::new(None),
            session_limit_exceeded: AtomicBool::new(false),
            resources,
            context,
            completion: Mutex::new(None),
            model,
        })
    }

    /// Position of the phase in its benchmark.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Phase name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The immutable definition.
    pub fn definition(&self) -> &PhaseDefinition {
        &self.definition
    }

    /// Current status.
    pub fn status(&self) -> PhaseStatus {
        self.status.load()
    }

    /// Sessions currently counted as active.
    pub fn active_sessions(&self) -> usize {
        self.active.count()
    }

    /// Whether the phase still admits sessions.
    pub fn active_state(&self) -> ActiveState {
        self.active.state()
    }

    /// Whether the phase ever found its pool empty.
    pub fn session_limit_exceeded(&self) -> bool {
        self.session_limit_exceeded.load(Ordering::Acquire)
    }

    /// Open-model arrivals waiting for a session; 0 for closed models.
    pub fn throttled_users(&self) -> usize {
        self.model.open().map_or(0, OpenModel::throttled)
    }

    /// Highest number of simultaneously throttled arrivals.
    pub fn peak_throttled_users(&self) -> usize {
        self.model.open().map_or(0, OpenModel::peak_throttled)
    }

    /// First error recorded on the phase.
    pub fn error(&self) -> Option<SchedulerError> {
        self.error.lock().clone()
    }

    /// Clock reading taken when the phase started.
    pub fn absolute_start(&self) -> Option<Duration> {
        match self.start_nanos.load(Ordering::Acquire) {
            NOT_STARTED => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    /// Time since the phase started, zero before that.
    pub fn elapsed(&self) -> Duration {
        self.absolute_start()
            .map_or(Duration::ZERO, |start| self.context.loops.now().saturating_sub(start))
    }

    /// Resource group of the phase.
    pub fn resources(&self) -> &Arc<SharedResources> {
        &self.resources
    }

    /// `NotStarted -> Running`, then the model's first tick.
    pub fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        if let Err(status) = self.status.transition(PhaseStatus::NotStarted, PhaseStatus::Running) {
            return Err(SchedulerError::IllegalPhaseTransition {
                phase: self.name().to_string(),
                action: "start",
                status,
            });
        }
        let now = self.context.loops.now();
        self.start_nanos
            .store(u64::try_from(now.as_nanos()).unwrap_or(NOT_STARTED - 1), Ordering::Release);
        self.changed(PhaseStatus::NotStarted, PhaseStatus::Running);

        match &self.model {
            Model::AtOnce { users } | Model::Always { users } => {
                for _ in 0..*users {
                    self.start_new_session(now);
                }
            }
            Model::Sequentially { .. } => {
                self.start_new_session(now);
            }
            Model::Noop => {}
            Model::Open(open) => {
                let first = open.advance_fire_time();
                let delay = Duration::from_nanos(first).saturating_sub(self.elapsed());
                self.schedule_tick(delay);
            }
        }
        Ok(())
    }

    /// `Running -> Finished`; terminates right away when no session is active.
    pub fn finish(&self) {
        match self.status.transition(PhaseStatus::Running, PhaseStatus::Finished) {
            Ok(()) => {
                self.changed(PhaseStatus::Running, PhaseStatus::Finished);
                if self.active.count() == 0 {
                    self.try_finalize();
                }
            }
            Err(status) => {
                tracing::debug!("Phase `{}` not finishing: status is {}", self.name(), status);
            }
        }
    }

    /// Move to `Terminating` and drain sessions.
    pub fn terminate(&self) {
        let status = self.status();
        if status.is_terminated() {
            tracing::debug!("Phase `{}` already {}", self.name(), status);
            return;
        }
        if let Ok(previous) = self.status.advance(PhaseStatus::Terminating) {
            self.changed(previous, PhaseStatus::Terminating);
        }
        self.try_terminate();
    }

    /// Finalize if no session is active, otherwise wake every session still
    /// serving this phase so it observes `Terminating`.
    pub fn try_terminate(&self) {
        if self.try_finalize() || self.active.state() == ActiveState::Closed {
            return;
        }
        let mut woken = 0;
        for session in self.resources.sessions() {
            if session.bound_phase() == Some(self.id) {
                session.proceed();
                woken += 1;
            }
        }
        tracing::debug!(
            "Phase `{}` waiting for {} sessions, woke {}",
            self.name(),
            self.active.count(),
            woken
        );
    }

    /// Record `error` (the first one wins) and terminate.
    pub fn fail(&self, error: SchedulerError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                tracing::error!("Phase `{}` failed: {}", self.name(), error);
                *slot = Some(error);
            } else {
                tracing::debug!("Phase `{}` failed again: {}", self.name(), error);
            }
        }
        self.terminate();
    }

    pub(crate) fn start_new_session(self: &Arc<Self>, intended_start: Duration) -> StartOutcome {
        if !self.active.try_increment() {
            tracing::debug!("Phase `{}` is closed, not starting a session", self.name());
            return StartOutcome::Closed;
        }
        match self.resources.pool().acquire() {
            Some(session) => {
                session.start(self, intended_start);
                StartOutcome::Started
            }
            None => {
                self.on_exhausted();
                self.release_slot();
                StartOutcome::Exhausted
            }
        }
    }

    /// A session completed every sequence.
    pub(crate) fn notify_finished(self: &Arc<Self>, session: Session) {
        let status = self.status();
        let mut all_repeats_done = false;
        match &self.model {
            Model::Always { .. } if status == PhaseStatus::Running => {
                session.start(self, self.context.loops.now());
                return;
            }
            Model::Sequentially { repeats, completions } => {
                let done = completions.fetch_add(1, Ordering::AcqRel) + 1;
                if done < *repeats && !status.is_terminating() {
                    session.start(self, self.context.loops.now());
                    return;
                }
                all_repeats_done = done >= *repeats;
            }
            Model::Open(open) if !status.is_terminating() => {
                if let Some(intended) = open.take_throttled() {
                    tracing::trace!(
                        "Phase `{}` restarting session {} for an arrival due at {:?}",
                        self.name(),
                        session.id(),
                        intended
                    );
                    session.start(self, intended);
                    return;
                }
            }
            _ => {}
        }
        self.release_session(session);
        if all_repeats_done {
            tracing::info!("Phase `{}` completed all repeats", self.name());
            self.terminate();
        }
    }

    /// A session drained after observing `Terminating`, or failed.
    pub(crate) fn notify_terminated(&self, session: Session) {
        self.release_session(session);
    }

    /// A started session could not bind; give its slot back.
    pub(crate) fn abandon_slot(&self) {
        self.release_slot();
    }

    pub(crate) fn take_completion(&self) -> Option<CompletionSignal> {
        self.completion.lock().take()
    }

    pub(crate) fn mark_stats_complete(&self) {
        match self.status.transition(PhaseStatus::Terminated, PhaseStatus::StatsComplete) {
            Ok(()) => self.changed(PhaseStatus::Terminated, PhaseStatus::StatsComplete),
            Err(status) => tracing::warn!(
                "Phase `{}` cannot complete statistics while {}",
                self.name(),
                status
            ),
        }
    }

    fn release_session(&self, session: Session) {
        self.resources.pool().release(session);
        self.release_slot();
    }

    fn release_slot(&self) {
        let remaining = self.active.decrement();
        if remaining == 0 && self.status().is_finished() {
            self.try_finalize();
        }
    }

    /// Close the active counter and move to `Terminated` if nothing runs.
    fn try_finalize(&self) -> bool {
        if !self.active.try_close() {
            return false;
        }
        match self.status.advance(PhaseStatus::Terminated) {
            Ok(previous) => self.changed(previous, PhaseStatus::Terminated),
            Err(status) => tracing::warn!(
                "Phase `{}` closed while already {}",
                self.name(),
                status
            ),
        }
        true
    }

    fn on_exhausted(&self) {
        if let Some(hook) = &self.context.exhaustion_hook {
            hook(self);
        }
        if !self.session_limit_exceeded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                "Phase `{}` exceeded its session limit: the pool of `{}` is empty",
                self.name(),
                self.resources.key()
            );
        } else {
            tracing::debug!("Phase `{}` still out of sessions", self.name());
        }
    }

    fn changed(&self, previous: PhaseStatus, status: PhaseStatus) {
        tracing::info!("Phase `{}` {} -> {}", self.name(), previous, status);
        let change = PhaseChange {
            phase: self.name().to_string(),
            iteration: self.definition.iteration,
            status,
            session_limit_exceeded: self.session_limit_exceeded(),
            error: self.error(),
        };
        let signal = self.context.handler.on_phase_change(&change);
        if status == PhaseStatus::Terminated {
            *self.completion.lock() = Some(signal);
        }
        self.context.wake.notify_one();
    }

    fn tick_executor(&self) -> &Arc<dyn EventExecutor> {
        self.context.loops.executor(self.id)
    }

    fn schedule_tick(self: &Arc<Self>, delay: Duration) {
        let phase = self.clone();
        let task = Box::new(move || phase.proceed_open());
        if delay.is_zero() {
            self.tick_executor().execute(task);
        } else {
            self.tick_executor().schedule(delay, task);
        }
    }

    /// One open-model arrival decision.
    fn proceed_open(self: &Arc<Self>) {
        let Some(open) = self.model.open() else {
            return;
        };
        if self.status() != PhaseStatus::Running {
            tracing::debug!("Phase `{}` stops generating arrivals", self.name());
            return;
        }
        let Some(start) = self.absolute_start() else {
            return;
        };

        let fire = Duration::from_nanos(open.next_fire_ns());
        let elapsed = self.elapsed();
        if elapsed < fire {
            self.schedule_tick(fire - elapsed);
            return;
        }

        // Sessions start at the scheduled arrival time, not at the moment this
        // tick happens to run.
        let intended = start + fire;
        if self.active.count() >= open.max_sessions() {
            self.on_exhausted();
            open.throttle(intended);
        } else {
            match self.start_new_session(intended) {
                StartOutcome::Started => {}
                StartOutcome::Exhausted => open.throttle(intended),
                StartOutcome::Closed => return,
            }
        }

        let next = open.advance_fire_time();
        if next == u64::MAX {
            tracing::debug!("Phase `{}` has no further arrivals", self.name());
            return;
        }
        let delay = Duration::from_nanos(next).saturating_sub(self.elapsed());
        self.schedule_tick(delay);
    }
}

impl fmt::Debug for PhaseInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseInstance")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("status", &self.status())
            .field("active", &self.active.state())
            .field("session_limit_exceeded", &self.session_limit_exceeded())
            .finish()
    }
}
