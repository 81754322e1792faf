//! The benchmark runner.
//!
//! The runner owns the phase instances of one benchmark and moves them
//! through their lifecycle against the group clock:
//!
//! 1. finish phases whose duration elapsed
//! 2. force-terminate phases whose max duration elapsed
//! 3. start phases whose start time passed and whose dependencies hold
//!
//! [`Runner::tick`] performs one such pass and reports how long the caller may
//! wait before the next one. [`Runner::run`] drives ticks on a tokio runtime,
//! waking early on phase status changes; deterministic tests drive ticks
//! themselves against a simulated clock.

mod abort;
mod report;

pub use abort::AbortHandle;
pub use report::{PhaseReport, RunReport};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use stampede_core::{EventLoops, SeededRandom};
use tokio::sync::Notify;

use crate::config::BenchmarkDefinition;
use crate::error::{SchedulerError, SchedulerResult};
use crate::phase::{
    CompletionSignal, ExhaustionHook, LoggingHandler, PhaseChangeHandler, PhaseContext,
    PhaseInstance, PhaseStatus,
};
use crate::shared::SharedResources;
use crate::stats::StatisticsRegistry;
use crate::watchdog::{Watchdog, WatchdogConfig};

/// Longest wait between two ticks.
pub const MAX_TICK_DELAY: Duration = Duration::from_secs(1);

/// Builder for [`Runner`].
pub struct RunnerBuilder {
    definition: BenchmarkDefinition,
    loops: EventLoops,
    handler: Arc<dyn PhaseChangeHandler>,
    exhaustion_hook: Option<ExhaustionHook>,
    abort: AbortHandle,
}

impl RunnerBuilder {
    /// Receive every phase status transition.
    pub fn handler(mut self, handler: Arc<dyn PhaseChangeHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Called each time a phase finds its session pool empty.
    pub fn on_session_limit(mut self, hook: ExhaustionHook) -> Self {
        self.exhaustion_hook = Some(hook);
        self
    }

    /// Share an abort handle with other components.
    pub fn abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Validate the definition, create resource groups, reserve their
    /// sessions and create the phase instances.
    pub fn build(self) -> SchedulerResult<Runner> {
        let definition = self.definition;
        definition.validate()?;

        let wake = Arc::new(Notify::new());
        let context = PhaseContext {
            loops: self.loops.clone(),
            handler: self.handler,
            exhaustion_hook: self.exhaustion_hook,
            wake: wake.clone(),
        };

        let ids = Arc::new(AtomicUsize::new(0));
        let mut groups: Vec<Arc<SharedResources>> = Vec::new();
        let mut capacities: Vec<usize> = Vec::new();
        let mut group_of: HashMap<&str, usize> = HashMap::new();
        for phase in &definition.phases {
            let key = phase.resource_key();
            let index = match group_of.get(key) {
                Some(&index) => index,
                None => {
                    groups.push(SharedResources::new(
                        key,
                        phase.scenario.clone(),
                        self.loops.clone(),
                        Arc::new(StatisticsRegistry::default()),
                        &definition.pool,
                        ids.clone(),
                    ));
                    capacities.push(0);
                    group_of.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            capacities[index] = capacities[index].max(phase.model.max_sessions());
        }
        for (group, capacity) in groups.iter().zip(&capacities) {
            group.pool().reserve(*capacity)?;
            tracing::info!("Resource group `{}` reserved {} sessions", group.key(), capacity);
        }

        let names: HashMap<&str, usize> = definition
            .phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        let lookup = |name: &String| names.get(name.as_str()).copied();

        let mut phases = Vec::with_capacity(definition.phases.len());
        for (id, phase) in definition.phases.iter().enumerate() {
            let random = match definition.seed {
                Some(seed) => SeededRandom::new(seed.wrapping_add(id as u64)),
                None => SeededRandom::from_entropy(),
            };
            let group = groups[group_of[phase.resource_key()]].clone();
            let instance =
                PhaseInstance::new(id, Arc::new(phase.clone()), group, context.clone(), random);
            phases.push(RunnerPhase {
                instance,
                start_after: phase.start_after.iter().filter_map(lookup).collect(),
                start_after_strict: phase.start_after_strict.iter().filter_map(lookup).collect(),
                start_with: phase
                    .start_with
                    .iter()
                    .filter_map(|s| lookup(&s.phase).map(|i| (i, s.delay)))
                    .collect(),
                completion: None,
            });
        }

        Ok(Runner {
            benchmark: definition.name.clone(),
            watchdog_config: definition.watchdog,
            loops: self.loops,
            phases,
            groups,
            wake,
            abort: self.abort,
            run_start: None,
            abort_applied: false,
            watchdog: None,
        })
    }
}

struct RunnerPhase {
    instance: Arc<PhaseInstance>,
    start_after: Vec<usize>,
    start_after_strict: Vec<usize>,
    start_with: Vec<(usize, Duration)>,
    completion: Option<CompletionSignal>,
}

enum Readiness {
    Ready,
    /// Waiting for a dependency to start, finish or terminate.
    Blocked,
    /// A `startWith` dependency started; this much delay is left.
    Delayed(Duration),
}

/// Drives the phases of one benchmark.
pub struct Runner {
    benchmark: String,
    watchdog_config: Option<WatchdogConfig>,
    loops: EventLoops,
    phases: Vec<RunnerPhase>,
    groups: Vec<Arc<SharedResources>>,
    wake: Arc<Notify>,
    abort: AbortHandle,
    run_start: Option<Duration>,
    abort_applied: bool,
    watchdog: Option<Watchdog>,
}

impl Runner {
    /// Start building a runner for `definition` on `loops`.
    pub fn builder(definition: BenchmarkDefinition, loops: EventLoops) -> RunnerBuilder {
        RunnerBuilder {
            definition,
            loops,
            handler: Arc::new(LoggingHandler),
            exhaustion_hook: None,
            abort: AbortHandle::new(),
        }
    }

    /// Benchmark name.
    pub fn benchmark(&self) -> &str {
        &self.benchmark
    }

    /// Look up a phase by name.
    pub fn phase(&self, name: &str) -> Option<&Arc<PhaseInstance>> {
        self.phases
            .iter()
            .map(|p| &p.instance)
            .find(|p| p.name() == name)
    }

    /// All phases, in declaration order.
    pub fn phases(&self) -> impl Iterator<Item = &Arc<PhaseInstance>> {
        self.phases.iter().map(|p| &p.instance)
    }

    /// Resource groups, in order of first use.
    pub fn groups(&self) -> &[Arc<SharedResources>] {
        &self.groups
    }

    /// The run's abort channel.
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    /// Start the watchdog if the benchmark configures one. Idempotent.
    pub fn start_watchdog(&mut self) {
        if self.watchdog.is_some() {
            return;
        }
        if let Some(config) = self.watchdog_config {
            self.watchdog = Some(Watchdog::start(&self.loops, config, self.abort.clone()));
        }
    }

    fn stop_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
    }

    /// One scheduling pass.
    ///
    /// Returns how long the caller may wait before the next pass, or `None`
    /// once every phase reached `Terminated`. A zero delay means a phase just
    /// started and the next pass should follow right away.
    pub fn tick(&mut self) -> Option<Duration> {
        let now = self.loops.now();
        let run_start = *self.run_start.get_or_insert(now);
        let elapsed = now.saturating_sub(run_start);

        if self.abort.is_aborted() && !self.abort_applied {
            self.abort_applied = true;
            tracing::warn!(
                "Terminating every phase of `{}`: {}",
                self.benchmark,
                self.abort.reason().unwrap_or_default()
            );
            for phase in &self.phases {
                phase.instance.terminate();
            }
        }

        let mut next = MAX_TICK_DELAY;
        let mut started = false;
        for index in 0..self.phases.len() {
            let phase = self.phases[index].instance.clone();
            let definition = phase.definition();

            if phase.status() == PhaseStatus::Running {
                if let Some(duration) = definition.effective_duration() {
                    let ran = phase.elapsed();
                    if ran >= duration {
                        phase.finish();
                    } else {
                        next = next.min(duration - ran);
                    }
                }
            }

            let status = phase.status();
            if status.is_started() && !status.is_terminating() {
                if let Some(max) = definition.max_duration {
                    let ran = phase.elapsed();
                    if ran >= max {
                        tracing::warn!(
                            "Phase `{}` exceeded its max duration of {:?}, terminating {} sessions",
                            phase.name(),
                            max,
                            phase.active_sessions()
                        );
                        phase.terminate();
                    } else {
                        next = next.min(max - ran);
                    }
                }
            }

            if phase.status() != PhaseStatus::NotStarted || self.abort_applied {
                continue;
            }
            if elapsed < definition.start_time {
                next = next.min(definition.start_time - elapsed);
                continue;
            }
            match self.readiness(index) {
                Readiness::Ready => match phase.start() {
                    Ok(()) => started = true,
                    Err(err) => tracing::warn!("Phase `{}` not started: {}", phase.name(), err),
                },
                Readiness::Delayed(delay) => next = next.min(delay),
                Readiness::Blocked => {}
            }
        }

        if self.phases.iter().all(|p| p.instance.status().is_terminated()) {
            tracing::info!("All phases of `{}` terminated", self.benchmark);
            return None;
        }
        Some(if started { Duration::ZERO } else { next })
    }

    fn readiness(&self, index: usize) -> Readiness {
        let phase = &self.phases[index];
        let status = |i: usize| self.phases[i].instance.status();

        if phase.start_after.iter().any(|&i| !status(i).is_finished())
            || phase.start_after_strict.iter().any(|&i| !status(i).is_terminated())
        {
            return Readiness::Blocked;
        }
        let mut remaining = Duration::ZERO;
        for &(dependency, delay) in &phase.start_with {
            let dependency = &self.phases[dependency].instance;
            if !dependency.status().is_started() {
                return Readiness::Blocked;
            }
            remaining = remaining.max(delay.saturating_sub(dependency.elapsed()));
        }
        if remaining.is_zero() {
            Readiness::Ready
        } else {
            Readiness::Delayed(remaining)
        }
    }

    /// Move every terminated phase whose handler signal completed to
    /// `StatsComplete`, without waiting. Returns whether all phases are there.
    pub fn try_complete_stats(&mut self) -> bool {
        let mut all = true;
        for phase in &mut self.phases {
            match phase.instance.status() {
                PhaseStatus::StatsComplete => continue,
                PhaseStatus::Terminated => {}
                _ => {
                    all = false;
                    continue;
                }
            }
            if phase.completion.is_none() {
                phase.completion = phase.instance.take_completion();
            }
            let done = phase.completion.as_mut().map_or(false, CompletionSignal::is_complete);
            if done {
                phase.completion = None;
                phase.instance.mark_stats_complete();
            } else {
                all = false;
            }
        }
        all
    }

    /// Drive the benchmark to completion.
    ///
    /// Waits between ticks until the next deadline, a phase status change or
    /// an abort, whatever comes first. Once every phase terminated, waits for
    /// the handler's completion signals and marks the phases `StatsComplete`.
    #[tracing::instrument(skip_all, fields(benchmark = %self.benchmark))]
    pub async fn run(&mut self) -> SchedulerResult<RunReport> {
        tracing::info!("Running {} phases", self.phases.len());
        self.start_watchdog();
        let wake = self.wake.clone();
        let abort = self.abort.clone();

        while let Some(delay) = self.tick() {
            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            let watching = !self.abort_applied;
            tokio::select! {
                _ = wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
                _ = abort.cancelled(), if watching => {}
            }
        }
        self.stop_watchdog();

        for phase in &mut self.phases {
            if phase.instance.status() == PhaseStatus::StatsComplete {
                continue;
            }
            let signal = loop {
                let taken = phase.completion.take().or_else(|| phase.instance.take_completion());
                if let Some(signal) = taken {
                    break signal;
                }
                // The handler is still being called on another thread.
                tokio::task::yield_now().await;
            };
            signal.wait().await;
            phase.instance.mark_stats_complete();
        }

        let report = self.report();
        tracing::info!("Benchmark `{}` done in {:?}", self.benchmark, report.elapsed);
        match self.abort.reason() {
            Some(reason) => Err(SchedulerError::Aborted(reason)),
            None => Ok(report),
        }
    }

    /// Snapshot of every phase and statistic.
    pub fn report(&self) -> RunReport {
        let elapsed = self
            .run_start
            .map_or(Duration::ZERO, |start| self.loops.now().saturating_sub(start));
        RunReport {
            benchmark: self.benchmark.clone(),
            elapsed,
            phases: self
                .phases
                .iter()
                .map(|p| PhaseReport::new(&p.instance, self.run_start))
                .collect(),
            statistics: self
                .groups
                .iter()
                .flat_map(|g| g.statistics().snapshot())
                .collect(),
            aborted: self.abort.reason(),
        }
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("benchmark", &self.benchmark)
            .field("phases", &self.phases.iter().map(|p| &p.instance).collect::<Vec<_>>())
            .field("groups", &self.groups.len())
            .field("aborted", &self.abort.is_aborted())
            .finish()
    }
}
