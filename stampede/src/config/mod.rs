//! Benchmark configuration.
//!
//! Definitions are plain data: build them with the fluent builders or load
//! them from JSON with [`BenchmarkDefinition::from_json`], then hand them to
//! the [`Runner`](crate::runner::Runner), which validates and never mutates
//! them.
//!
//! ```json
//! {
//!   "name": "checkout",
//!   "pool": { "kind": "affinity" },
//!   "phases": [
//!     { "name": "rampUp",
//!       "model": { "type": "rampRate", "initialUsersPerSec": 1, "targetUsersPerSec": 50 },
//!       "duration": 30000, "sharedResources": "users" },
//!     { "name": "steady", "model": { "type": "constantRate", "usersPerSec": 50 },
//!       "duration": 60000, "maxDuration": 90000, "startAfter": ["rampUp"],
//!       "sharedResources": "users" }
//!   ]
//! }
//! ```

pub(crate) mod millis;
mod phase;
mod validate;

pub use phase::{ModelConfig, PhaseDefinition, PhaseDefinitionBuilder, StartWith};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use crate::pool::{DepletionPolicy, PoolKind};
use crate::error::{SchedulerError, SchedulerResult};
use crate::scenario::Scenario;
use crate::watchdog::WatchdogConfig;

/// Pool strategy shared by every resource group of a benchmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Pool implementation.
    #[serde(default)]
    pub kind: PoolKind,
    /// Behavior of elastic pools when empty.
    #[serde(default)]
    pub depletion: DepletionPolicy,
}

/// A complete benchmark: phases plus run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkDefinition {
    /// Benchmark name.
    pub name: String,
    /// Phases, in declaration order.
    #[serde(default)]
    pub phases: Vec<PhaseDefinition>,
    /// Session pool strategy.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Seed for open-model arrival jitter; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Scheduling watchdog; disabled when absent.
    #[serde(default)]
    pub watchdog: Option<WatchdogConfig>,
}

impl BenchmarkDefinition {
    /// Start building a benchmark.
    pub fn builder(name: impl Into<String>) -> BenchmarkBuilder {
        BenchmarkBuilder {
            definition: BenchmarkDefinition {
                name: name.into(),
                phases: Vec::new(),
                pool: PoolConfig::default(),
                seed: None,
                watchdog: None,
            },
        }
    }

    /// Parse a JSON definition.
    ///
    /// Scenarios are not part of the JSON; attach them before validating.
    pub fn from_json(json: &str) -> SchedulerResult<Self> {
        let definition: BenchmarkDefinition = serde_json::from_str(json)?;
        tracing::debug!(
            "Parsed benchmark `{}` with {} phases",
            definition.name,
            definition.phases.len()
        );
        Ok(definition)
    }

    /// Attach `scenario` to the phase called `phase`.
    pub fn with_scenario(mut self, phase: &str, scenario: Arc<Scenario>) -> SchedulerResult<Self> {
        let target = self
            .phases
            .iter_mut()
            .find(|p| p.name == phase)
            .ok_or_else(|| SchedulerError::InvalidDefinition(format!("no phase named `{phase}`")))?;
        target.scenario = scenario;
        Ok(self)
    }

    /// Attach `scenario` to every phase.
    pub fn with_default_scenario(mut self, scenario: Arc<Scenario>) -> Self {
        for phase in &mut self.phases {
            phase.scenario = scenario.clone();
        }
        self
    }

    /// Look up a phase by name.
    pub fn phase(&self, name: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Check names, dependencies, model parameters and resource groups.
    pub fn validate(&self) -> SchedulerResult<()> {
        validate::validate(self)
    }
}

/// Builder for [`BenchmarkDefinition`].
#[derive(Debug)]
pub struct BenchmarkBuilder {
    definition: BenchmarkDefinition,
}

impl BenchmarkBuilder {
    /// Add a phase.
    pub fn phase(mut self, phase: PhaseDefinition) -> Self {
        self.definition.phases.push(phase);
        self
    }

    /// Choose the pool implementation.
    pub fn pool(mut self, kind: PoolKind) -> Self {
        self.definition.pool.kind = kind;
        self
    }

    /// Choose what elastic pools do when empty.
    pub fn depletion(mut self, policy: DepletionPolicy) -> Self {
        self.definition.pool.depletion = policy;
        self
    }

    /// Fix the arrival jitter seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.definition.seed = Some(seed);
        self
    }

    /// Enable the scheduling watchdog.
    pub fn watchdog(mut self, config: WatchdogConfig) -> Self {
        self.definition.watchdog = Some(config);
        self
    }

    /// Validate and build.
    pub fn build(self) -> SchedulerResult<BenchmarkDefinition> {
        self.definition.validate()?;
        Ok(self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_json() {
        let json = r#"{
            "name": "demo",
            "pool": { "kind": "affinity", "depletion": "allocate" },
            "seed": 42,
            "phases": [
                { "name": "warm", "model": { "type": "atOnce", "users": 2 }, "isWarmup": true },
                { "name": "load",
                  "model": { "type": "constantRate", "usersPerSec": 10, "maxSessions": 4 },
                  "duration": 1000, "maxDuration": 5000, "startAfterStrict": ["warm"],
                  "startWith": [{ "phase": "warm", "delay": 250 }] }
            ]
        }"#;
        let benchmark = BenchmarkDefinition::from_json(json).expect("valid json");
        assert_eq!(benchmark.pool.kind, PoolKind::Affinity);
        assert_eq!(benchmark.pool.depletion, DepletionPolicy::Allocate);
        assert_eq!(benchmark.seed, Some(42));

        let load = benchmark.phase("load").expect("declared");
        assert_eq!(load.duration, Some(Duration::from_secs(1)));
        assert_eq!(load.max_duration, Some(Duration::from_secs(5)));
        assert_eq!(load.start_with[0].delay, Duration::from_millis(250));
        assert_eq!(load.model.max_sessions(), 4);
        assert!(benchmark.phase("warm").expect("declared").is_warmup);
        benchmark.validate().expect("consistent");
    }

    #[test]
    fn test_malformed_json() {
        let err = BenchmarkDefinition::from_json("{\"phases\": 3}").expect_err("not a benchmark");
        assert!(matches!(err, SchedulerError::Parse(_)));
    }

    #[test]
    fn test_with_scenario() {
        let benchmark = BenchmarkDefinition::builder("demo")
            .phase(PhaseDefinition::builder("a", ModelConfig::Noop).build())
            .build()
            .expect("valid");
        let scenario = Scenario::builder().build().expect("empty");
        let benchmark = benchmark.with_scenario("a", scenario.clone()).expect("known phase");
        assert!(Arc::ptr_eq(&benchmark.phases[0].scenario, &scenario));
        assert!(benchmark.with_scenario("b", scenario).is_err());
    }
}
