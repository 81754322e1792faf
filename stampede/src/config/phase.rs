use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scenario::Scenario;

/// How a phase creates sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ModelConfig {
    /// Start `users` sessions when the phase starts.
    AtOnce {
        /// Sessions to start.
        users: usize,
    },
    /// Keep `users` sessions running until the phase finishes.
    Always {
        /// Sessions to keep running.
        users: usize,
    },
    /// Run one session `repeats` times back to back.
    Sequentially {
        /// Completions before the phase terminates.
        repeats: usize,
    },
    /// Start nothing; useful as a dependency anchor.
    Noop,
    /// Open model with a constant arrival rate.
    ConstantRate {
        /// Arrivals per second.
        users_per_sec: f64,
        /// Poisson arrivals instead of a fixed period.
        #[serde(default)]
        variance: bool,
        /// Admission cap; defaults to `ceil(users_per_sec)`.
        #[serde(default)]
        max_sessions: Option<usize>,
    },
    /// Open model with a rate ramping linearly over the phase duration.
    RampRate {
        /// Arrival rate at the phase start.
        initial_users_per_sec: f64,
        /// Arrival rate at the end of the phase duration.
        target_users_per_sec: f64,
        /// Poisson arrivals instead of deterministic spacing.
        #[serde(default)]
        variance: bool,
        /// Admission cap; defaults to `ceil(max(initial, target))`.
        #[serde(default)]
        max_sessions: Option<usize>,
    },
}

impl ModelConfig {
    /// Shorthand for [`ModelConfig::AtOnce`].
    pub fn at_once(users: usize) -> Self {
        ModelConfig::AtOnce { users }
    }

    /// Shorthand for [`ModelConfig::Always`].
    pub fn always(users: usize) -> Self {
        ModelConfig::Always { users }
    }

    /// Shorthand for [`ModelConfig::Sequentially`].
    pub fn sequentially(repeats: usize) -> Self {
        ModelConfig::Sequentially { repeats }
    }

    /// Shorthand for a deterministic [`ModelConfig::ConstantRate`].
    pub fn constant_rate(users_per_sec: f64) -> Self {
        ModelConfig::ConstantRate {
            users_per_sec,
            variance: false,
            max_sessions: None,
        }
    }

    /// Shorthand for a deterministic [`ModelConfig::RampRate`].
    pub fn ramp_rate(initial_users_per_sec: f64, target_users_per_sec: f64) -> Self {
        ModelConfig::RampRate {
            initial_users_per_sec,
            target_users_per_sec,
            variance: false,
            max_sessions: None,
        }
    }

    /// Set the admission cap of an open model; other models are unchanged.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        if let ModelConfig::ConstantRate { max_sessions, .. }
        | ModelConfig::RampRate { max_sessions, .. } = &mut self
        {
            *max_sessions = Some(max);
        }
        self
    }

    /// Switch an open model to Poisson arrivals; other models are unchanged.
    pub fn with_variance(mut self) -> Self {
        if let ModelConfig::ConstantRate { variance, .. } | ModelConfig::RampRate { variance, .. } =
            &mut self
        {
            *variance = true;
        }
        self
    }

    /// Whether arrivals are rate-driven.
    pub fn is_open(&self) -> bool {
        matches!(self, ModelConfig::ConstantRate { .. } | ModelConfig::RampRate { .. })
    }

    /// Sessions the pool must hold for this model.
    pub fn max_sessions(&self) -> usize {
        match self {
            ModelConfig::AtOnce { users } | ModelConfig::Always { users } => *users,
            ModelConfig::Sequentially { .. } => 1,
            ModelConfig::Noop => 0,
            ModelConfig::ConstantRate {
                users_per_sec,
                max_sessions,
                ..
            } => max_sessions.unwrap_or_else(|| rate_cap(*users_per_sec)),
            ModelConfig::RampRate {
                initial_users_per_sec,
                target_users_per_sec,
                max_sessions,
                ..
            } => max_sessions
                .unwrap_or_else(|| rate_cap(initial_users_per_sec.max(*target_users_per_sec))),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ModelConfig::AtOnce { .. } => "atOnce",
            ModelConfig::Always { .. } => "always",
            ModelConfig::Sequentially { .. } => "sequentially",
            ModelConfig::Noop => "noop",
            ModelConfig::ConstantRate { .. } => "constantRate",
            ModelConfig::RampRate { .. } => "rampRate",
        }
    }
}

fn rate_cap(rate: f64) -> usize {
    if rate.is_finite() && rate > 0.0 {
        (rate.ceil() as usize).max(1)
    } else {
        1
    }
}

/// Start a phase a fixed delay after another phase started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWith {
    /// Phase to follow.
    pub phase: String,
    /// Delay after that phase started.
    #[serde(default, with = "super::millis")]
    pub delay: Duration,
}

/// Immutable description of one phase.
///
/// Durations are milliseconds in JSON. The scenario is not part of the
/// serialized form; attach it with [`BenchmarkDefinition::with_scenario`] or
/// the builder.
///
/// [`BenchmarkDefinition::with_scenario`]: crate::config::BenchmarkDefinition::with_scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    /// Unique phase name.
    pub name: String,
    /// Session creation model.
    pub model: ModelConfig,
    /// Time after which the phase stops creating sessions.
    #[serde(default, with = "super::millis::option")]
    pub duration: Option<Duration>,
    /// Time after which remaining sessions are forcibly terminated.
    #[serde(default, with = "super::millis::option")]
    pub max_duration: Option<Duration>,
    /// Earliest start, relative to the start of the run.
    #[serde(default, with = "super::millis")]
    pub start_time: Duration,
    /// Phases that must have finished first.
    #[serde(default)]
    pub start_after: Vec<String>,
    /// Phases that must have terminated first.
    #[serde(default)]
    pub start_after_strict: Vec<String>,
    /// Phases that must have started some time before.
    #[serde(default)]
    pub start_with: Vec<StartWith>,
    /// Resource group key; defaults to the phase name.
    #[serde(default)]
    pub shared_resources: Option<String>,
    /// Warmup phases are reported but typically excluded from results.
    #[serde(default)]
    pub is_warmup: bool,
    /// Iteration number when a phase is repeated.
    #[serde(default)]
    pub iteration: u32,
    /// What each session runs.
    #[serde(skip)]
    pub scenario: Arc<Scenario>,
}

impl PhaseDefinition {
    /// Start building a phase.
    pub fn builder(name: impl Into<String>, model: ModelConfig) -> PhaseDefinitionBuilder {
        PhaseDefinitionBuilder {
            definition: PhaseDefinition {
                name: name.into(),
                model,
                duration: None,
                max_duration: None,
                start_time: Duration::ZERO,
                start_after: Vec::new(),
                start_after_strict: Vec::new(),
                start_with: Vec::new(),
                shared_resources: None,
                is_warmup: false,
                iteration: 0,
                scenario: Arc::default(),
            },
        }
    }

    /// Key of the resource group this phase belongs to.
    pub fn resource_key(&self) -> &str {
        self.shared_resources.as_deref().unwrap_or(&self.name)
    }

    /// Duration after which the runner finishes the phase.
    ///
    /// Closed models that start their sessions up front default to zero, so
    /// they finish right after starting and terminate once their sessions
    /// complete.
    pub fn effective_duration(&self) -> Option<Duration> {
        self.duration.or(match self.model {
            ModelConfig::AtOnce { .. } | ModelConfig::Sequentially { .. } | ModelConfig::Noop => {
                Some(Duration::ZERO)
            }
            _ => None,
        })
    }

    /// Names of every phase this one depends on.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.start_after
            .iter()
            .chain(self.start_after_strict.iter())
            .map(String::as_str)
            .chain(self.start_with.iter().map(|s| s.phase.as_str()))
    }
}

/// Builder for [`PhaseDefinition`].
#[derive(Debug)]
pub struct PhaseDefinitionBuilder {
    definition: PhaseDefinition,
}

impl PhaseDefinitionBuilder {
    /// Stop creating sessions after `duration`.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.definition.duration = Some(duration);
        self
    }

    /// Terminate remaining sessions after `max_duration`.
    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.definition.max_duration = Some(max_duration);
        self
    }

    /// Do not start before `start_time` into the run.
    pub fn start_time(mut self, start_time: Duration) -> Self {
        self.definition.start_time = start_time;
        self
    }

    /// Start after `phase` finished.
    pub fn start_after(mut self, phase: impl Into<String>) -> Self {
        self.definition.start_after.push(phase.into());
        self
    }

    /// Start after `phase` terminated.
    pub fn start_after_strict(mut self, phase: impl Into<String>) -> Self {
        self.definition.start_after_strict.push(phase.into());
        self
    }

    /// Start `delay` after `phase` started.
    pub fn start_with(mut self, phase: impl Into<String>, delay: Duration) -> Self {
        self.definition.start_with.push(StartWith {
            phase: phase.into(),
            delay,
        });
        self
    }

    /// Share sessions, pool and statistics with other phases using `key`.
    pub fn shared_resources(mut self, key: impl Into<String>) -> Self {
        self.definition.shared_resources = Some(key.into());
        self
    }

    /// Mark as warmup.
    pub fn warmup(mut self, is_warmup: bool) -> Self {
        self.definition.is_warmup = is_warmup;
        self
    }

    /// Set the iteration number.
    pub fn iteration(mut self, iteration: u32) -> Self {
        self.definition.iteration = iteration;
        self
    }

    /// Set the scenario.
    pub fn scenario(mut self, scenario: Arc<Scenario>) -> Self {
        self.definition.scenario = scenario;
        self
    }

    /// Finish building.
    pub fn build(self) -> PhaseDefinition {
        self.definition
    }
}
