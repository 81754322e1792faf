//! Sessions: pooled execution contexts for one virtual user each.
//!
//! A [`Session`] is a cheap handle. The state it guards, [`SessionCore`], is
//! only ever locked by tasks running on the session's executor (plus
//! [`Session::inspect`] for diagnostics), so the lock is uncontended in
//! practice and merely makes the confinement visible to the compiler.
//!
//! ## Run loop
//!
//! ```text
//! start(phase) ──► bind + instantiate initial sequences ──► run
//! proceed()    ──────────────────────────────────────────► run
//!
//! run: for each enabled sequence (by slot)
//!        phase terminating?  ──► drain, cancel, reset ──► notify_terminated
//!        progress ──► completed? release instance
//!      nothing enabled       ──► reset ──► notify_finished
//!      full pass, no progress ──► return to the executor
//! ```

mod factory;
mod resources;
mod vars;

pub use factory::SessionFactory;
pub use resources::{Resources, SessionResource};
pub use vars::{VarKind, Vars};

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use stampede_core::{Clock, EventExecutor};

use crate::error::{SchedulerError, SchedulerResult};
use crate::phase::{PhaseInstance, PhaseStatus};
use crate::scenario::Scenario;
use crate::sequence::{SequenceInstance, SequencePool, SequenceTemplate};
use crate::stats::{Statistics, StatisticsRegistry};

/// The sequence whose step is being invoked.
#[derive(Debug, Clone)]
pub struct CurrentSequence {
    template: Arc<SequenceTemplate>,
    index: usize,
}

impl CurrentSequence {
    /// Template of the running instance.
    pub fn template(&self) -> &Arc<SequenceTemplate> {
        &self.template
    }

    /// Concurrency slot of the running instance.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// What a run of the session loop ended with.
#[derive(Debug)]
pub(crate) enum RunOutcome {
    /// No phase was bound; a stale wake-up.
    Idle,
    /// Every enabled sequence is blocked.
    Suspended,
    /// All sequences completed.
    Finished(Arc<PhaseInstance>),
    /// The phase was terminating; sequences were drained.
    Terminated(Arc<PhaseInstance>),
    /// A step failed.
    Failed(Arc<PhaseInstance>, SchedulerError),
}

/// Mutable state of a session, handed to steps while they run.
pub struct SessionCore {
    id: usize,
    group: Arc<str>,
    executor: Arc<dyn EventExecutor>,
    clock: Arc<dyn Clock>,
    scenario: Arc<Scenario>,
    statistics: Arc<StatisticsRegistry>,
    vars: Vars,
    resources: Resources,
    sequences: SequencePool,
    enabled: Vec<SequenceInstance>,
    /// Activations made while the current pass runs; merged before the next.
    started: Vec<SequenceInstance>,
    current: Option<CurrentSequence>,
    complete_requested: bool,
    phase: Option<Arc<PhaseInstance>>,
    start_time: Duration,
    handle: Weak<SessionShared>,
}

impl SessionCore {
    /// Session id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Executor this session is bound to.
    pub fn executor(&self) -> &Arc<dyn EventExecutor> {
        &self.executor
    }

    /// Current time on the group clock.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Intended start time of the current run.
    ///
    /// For open-model phases this is the scheduled arrival time, which may be
    /// earlier than the moment the session actually started when arrivals were
    /// throttled. Latency measured from here includes that queueing delay.
    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    /// Name of the phase this session currently serves.
    pub fn phase_name(&self) -> Option<&str> {
        self.phase.as_deref().map(PhaseInstance::name)
    }

    /// Handle to this session, e.g. for calling [`Session::proceed`] from a
    /// completion callback.
    pub fn session(&self) -> Option<Session> {
        self.handle.upgrade().map(|shared| Session { shared })
    }

    /// The sequence whose step is running, `None` outside step invocations.
    pub fn current_sequence(&self) -> Option<&CurrentSequence> {
        self.current.as_ref()
    }

    fn current_index(&self) -> Option<usize> {
        self.current.as_ref().map(CurrentSequence::index)
    }

    fn current_concurrency(&self, name: &str) -> SchedulerResult<usize> {
        self.current
            .as_ref()
            .map(|c| c.template.concurrency())
            .ok_or_else(|| SchedulerError::NoCurrentSequence(name.to_string()))
    }

    /// Declared variables.
    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    /// Declared resources.
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Declare a scalar integer variable.
    pub fn declare_int(&mut self, name: &str) -> SchedulerResult<()> {
        self.vars.declare_int(name)
    }

    /// Declare a scalar object variable.
    pub fn declare_object(&mut self, name: &str) -> SchedulerResult<()> {
        self.vars.declare_object(name)
    }

    /// Declare an integer variable with one slot per instance of the current
    /// sequence.
    pub fn declare_sequence_int(&mut self, name: &str) -> SchedulerResult<()> {
        let concurrency = self.current_concurrency(name)?;
        self.vars.declare_sequence_int(name, concurrency)
    }

    /// Declare an object variable with one slot per instance of the current
    /// sequence.
    pub fn declare_sequence_object(&mut self, name: &str) -> SchedulerResult<()> {
        let concurrency = self.current_concurrency(name)?;
        self.vars.declare_sequence_object(name, concurrency)
    }

    /// Set an integer variable.
    pub fn set_int(&mut self, name: &str, value: i64) -> SchedulerResult<()> {
        let index = self.current_index();
        self.vars.set_int(name, index, value)
    }

    /// Read an integer variable; unset variables are an error.
    pub fn get_int(&mut self, name: &str) -> SchedulerResult<i64> {
        let index = self.current_index();
        self.vars.get_int(name, index)
    }

    /// Set an object variable.
    pub fn set_object(&mut self, name: &str, value: Value) -> SchedulerResult<()> {
        let index = self.current_index();
        self.vars.set_object(name, index, value)
    }

    /// Read an object variable; unset variables are an error.
    pub fn get_object(&mut self, name: &str) -> SchedulerResult<&Value> {
        let index = self.current_index();
        self.vars.get_object(name, index)
    }

    /// Whether a variable (or the current slot of a sequence-scoped one) is set.
    pub fn is_set(&mut self, name: &str) -> SchedulerResult<bool> {
        let index = self.current_index();
        self.vars.is_set(name, index)
    }

    /// Clear a variable.
    pub fn unset(&mut self, name: &str) -> SchedulerResult<()> {
        let index = self.current_index();
        self.vars.unset(name, index)
    }

    /// Declare a named resource.
    pub fn declare_resource<R: SessionResource>(
        &mut self,
        name: &str,
        resource: R,
    ) -> SchedulerResult<()> {
        self.resources.declare(name, resource)
    }

    /// Typed access to a resource.
    pub fn resource<R: SessionResource>(&self, name: &str) -> SchedulerResult<&R> {
        self.resources.get(name)
    }

    /// Typed mutable access to a resource.
    pub fn resource_mut<R: SessionResource>(&mut self, name: &str) -> SchedulerResult<&mut R> {
        self.resources.get_mut(name)
    }

    /// Counters for `name` in the current phase.
    pub fn statistics(&self, name: &str) -> Arc<Statistics> {
        self.statistics.get(self.phase_name().unwrap_or_default(), name)
    }

    /// Number of enabled sequence instances, including ones started during the
    /// current pass.
    pub fn enabled_sequences(&self) -> usize {
        self.enabled.len() + self.started.len()
    }

    /// Enable `name` at its lowest free index.
    ///
    /// Returns `Ok(false)` and logs a warning when every index is taken or the
    /// session ran out of sequence instances.
    pub fn start_sequence(&mut self, name: &str) -> SchedulerResult<bool> {
        let template = self.scenario.sequence(name)?.clone();
        match self.sequences.free_index(&template) {
            Some(index) => Ok(self.instantiate(&template, index)),
            None => {
                tracing::warn!(
                    "Session {}: all {} instances of sequence `{}` are running",
                    self.id,
                    template.concurrency(),
                    name
                );
                Ok(false)
            }
        }
    }

    /// Enable `name` at an explicit index.
    pub fn start_sequence_at(&mut self, name: &str, index: usize) -> SchedulerResult<bool> {
        let template = self.scenario.sequence(name)?.clone();
        Ok(self.instantiate(&template, index))
    }

    /// Mark the current sequence complete once the running step returns `true`.
    pub fn complete_sequence(&mut self) {
        self.complete_requested = true;
    }

    pub(crate) fn take_completion_request(&mut self) -> bool {
        mem::take(&mut self.complete_requested)
    }

    fn instantiate(&mut self, template: &Arc<SequenceTemplate>, index: usize) -> bool {
        match self.sequences.acquire(template, index) {
            Some(instance) => {
                self.started.push(instance);
                true
            }
            None => false,
        }
    }

    fn enter_sequence(
        &mut self,
        template: Arc<SequenceTemplate>,
        index: usize,
    ) -> SchedulerResult<()> {
        if let Some(current) = &self.current {
            return Err(SchedulerError::SequenceAlreadyActive {
                current: current.template.name().to_string(),
                next: template.name().to_string(),
            });
        }
        self.current = Some(CurrentSequence { template, index });
        Ok(())
    }

    fn progress_instance(&mut self, instance: &mut SequenceInstance) -> SchedulerResult<bool> {
        let Some(template) = instance.template().cloned() else {
            instance.mark_completed();
            return Ok(true);
        };
        self.enter_sequence(template, instance.index())?;
        let result = instance.progress(self);
        self.current = None;
        self.complete_requested = false;
        result
    }

    fn bind(&mut self, phase: Arc<PhaseInstance>, intended_start: Duration) -> SchedulerResult<()> {
        let key = phase.resources().key();
        if key != &*self.group {
            return Err(SchedulerError::ForeignResourceGroup {
                session: self.id,
                expected: self.group.to_string(),
                actual: key.to_string(),
            });
        }
        if let Some(previous) = &self.phase {
            tracing::warn!(
                "Session {} started for `{}` while still serving `{}`",
                self.id,
                phase.name(),
                previous.name()
            );
            self.release_all();
            self.reset();
        }
        self.phase = Some(phase);
        self.start_time = intended_start;
        let scenario = self.scenario.clone();
        for template in scenario.initial_sequences() {
            self.instantiate(template, 0);
        }
        Ok(())
    }

    pub(crate) fn run_session(&mut self) -> RunOutcome {
        let Some(phase) = self.phase.clone() else {
            return RunOutcome::Idle;
        };
        loop {
            self.enabled.append(&mut self.started);
            if self.enabled.is_empty() {
                self.reset();
                self.phase = None;
                return RunOutcome::Finished(phase);
            }

            let mut pass = mem::take(&mut self.enabled);
            let mut progressed = false;
            let mut slot = 0;
            while slot < pass.len() {
                if phase.status() >= PhaseStatus::Terminating {
                    self.enabled = pass;
                    tracing::debug!(
                        "Session {} drained for terminating phase `{}`",
                        self.id,
                        phase.name()
                    );
                    self.stop();
                    return RunOutcome::Terminated(phase);
                }
                match self.progress_instance(&mut pass[slot]) {
                    Ok(advanced) => progressed |= advanced,
                    Err(err) => {
                        self.enabled = pass;
                        tracing::warn!(
                            "Session {} failed in phase `{}`: {}",
                            self.id,
                            phase.name(),
                            err
                        );
                        self.stop();
                        return RunOutcome::Failed(phase, err);
                    }
                }
                if pass[slot].is_completed() {
                    let done = pass.remove(slot);
                    self.sequences.release(done);
                } else {
                    slot += 1;
                }
            }
            self.enabled = pass;

            // Sequences started during a blocked pass still get their turn.
            if !progressed && self.started.is_empty() {
                return RunOutcome::Suspended;
            }
        }
    }

    /// Stop every instance after a panic escaped a step.
    fn abort_run(&mut self, err: SchedulerError) -> RunOutcome {
        tracing::error!("Session {} aborted: {}", self.id, err);
        self.stop();
        // Instances of the interrupted pass were dropped during the unwind.
        self.sequences =
            SequencePool::new(self.scenario.max_sequences(), self.scenario.sequences());
        match self.phase.take() {
            Some(phase) => RunOutcome::Failed(phase, err),
            None => RunOutcome::Idle,
        }
    }

    fn release_all(&mut self) {
        self.enabled.append(&mut self.started);
        for instance in self.enabled.drain(..) {
            self.sequences.release(instance);
        }
    }

    /// Drain all instances, cancel outstanding resource work and reset.
    fn stop(&mut self) {
        self.release_all();
        self.resources.cancel_all();
        self.reset();
        self.phase = None;
    }

    /// Unset every variable and reset every resource.
    pub(crate) fn reset(&mut self) {
        self.vars.reset();
        self.resources.reset();
        self.current = None;
        self.complete_requested = false;
    }
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("id", &self.id)
            .field("executor", &self.executor.id())
            .field("phase", &self.phase_name())
            .field("enabled", &self.enabled_sequences())
            .field("vars", &self.vars.len())
            .field("resources", &self.resources)
            .finish()
    }
}

struct SessionShared {
    id: usize,
    group: Arc<str>,
    executor: Arc<dyn EventExecutor>,
    /// A run task is queued and has not started yet.
    scheduled: AtomicBool,
    /// Id + 1 of the phase being served, 0 when idle.
    bound_phase: AtomicUsize,
    core: Mutex<SessionCore>,
}

/// Handle to a pooled session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Build a session and let every step and utilizer declare its state.
    pub(crate) fn new(
        id: usize,
        group: Arc<str>,
        executor: Arc<dyn EventExecutor>,
        clock: Arc<dyn Clock>,
        scenario: Arc<Scenario>,
        statistics: Arc<StatisticsRegistry>,
    ) -> SchedulerResult<Self> {
        let capacity = scenario.max_sequences();
        let mut core = SessionCore {
            id,
            group: group.clone(),
            executor: executor.clone(),
            clock,
            sequences: SequencePool::new(capacity, scenario.sequences()),
            scenario: scenario.clone(),
            statistics,
            vars: Vars::default(),
            resources: Resources::default(),
            enabled: Vec::with_capacity(capacity),
            started: Vec::with_capacity(capacity),
            current: None,
            complete_requested: false,
            phase: None,
            start_time: Duration::ZERO,
            handle: Weak::new(),
        };

        for template in scenario.sequences() {
            for step in template.steps() {
                core.current = Some(CurrentSequence {
                    template: template.clone(),
                    index: 0,
                });
                let reserved = step.reserve(&mut core);
                core.current = None;
                reserved?;
            }
        }
        for utilizer in scenario.utilizers() {
            utilizer.reserve(&mut core)?;
        }

        let shared = Arc::new_cyclic(|weak| {
            core.handle = weak.clone();
            SessionShared {
                id,
                group,
                executor,
                scheduled: AtomicBool::new(false),
                bound_phase: AtomicUsize::new(0),
                core: Mutex::new(core),
            }
        });
        Ok(Self { shared })
    }

    /// Session id, unique within a run.
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Resource group this session was created for.
    pub fn group(&self) -> &str {
        &self.shared.group
    }

    /// Executor this session is bound to for its whole lifetime.
    pub fn executor(&self) -> &Arc<dyn EventExecutor> {
        &self.shared.executor
    }

    /// Shorthand for `self.executor().id()`.
    pub fn executor_id(&self) -> usize {
        self.shared.executor.id()
    }

    /// Id of the phase this session is serving, if any.
    pub fn bound_phase(&self) -> Option<usize> {
        self.shared.bound_phase.load(Ordering::Acquire).checked_sub(1)
    }

    /// Run `f` against the session state. Meant for diagnostics and tests.
    pub fn inspect<R>(&self, f: impl FnOnce(&SessionCore) -> R) -> R {
        f(&self.shared.core.lock())
    }

    /// Start serving `phase` on the bound executor.
    pub(crate) fn start(&self, phase: &Arc<PhaseInstance>, intended_start: Duration) {
        let session = self.clone();
        let phase = phase.clone();
        self.shared
            .executor
            .execute(Box::new(move || session.begin(phase, intended_start)));
    }

    /// Queue the run loop on the bound executor unless a run is already queued.
    pub fn proceed(&self) {
        if self.shared.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let session = self.clone();
        self.shared.executor.execute(Box::new(move || session.run()));
    }

    fn begin(&self, phase: Arc<PhaseInstance>, intended_start: Duration) {
        let bound = self.shared.core.lock().bind(phase.clone(), intended_start);
        if let Err(err) = bound {
            tracing::error!("Session {} cannot start: {}", self.id(), err);
            phase.fail(err);
            phase.resources().pool().release(self.clone());
            phase.abandon_slot();
            return;
        }
        self.shared.bound_phase.store(phase.id() + 1, Ordering::Release);
        self.run();
    }

    fn run(&self) {
        self.shared.scheduled.store(false, Ordering::Release);
        let outcome = {
            let mut core = self.shared.core.lock();
            let result = panic::catch_unwind(AssertUnwindSafe(|| core.run_session()));
            match result {
                Ok(outcome) => outcome,
                Err(payload) => {
                    core.abort_run(SchedulerError::StepPanicked(panic_message(&*payload)))
                }
            }
        };

        match outcome {
            RunOutcome::Idle | RunOutcome::Suspended => {}
            RunOutcome::Finished(phase) => {
                self.unbind();
                phase.notify_finished(self.clone());
            }
            RunOutcome::Terminated(phase) => {
                self.unbind();
                phase.notify_terminated(self.clone());
            }
            RunOutcome::Failed(phase, err) => {
                self.unbind();
                phase.fail(err);
                phase.notify_terminated(self.clone());
            }
        }
    }

    fn unbind(&self) {
        self.shared.bound_phase.store(0, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("group", &self.shared.group)
            .field("executor", &self.shared.executor.id())
            .field("bound_phase", &self.bound_phase())
            .finish()
    }
}
