use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{BenchmarkDefinition, ModelConfig, PhaseDefinition};
use crate::error::{SchedulerError, SchedulerResult};

fn invalid(message: String) -> SchedulerError {
    SchedulerError::InvalidDefinition(message)
}

pub(super) fn validate(benchmark: &BenchmarkDefinition) -> SchedulerResult<()> {
    if benchmark.phases.is_empty() {
        return Err(invalid(format!("benchmark `{}` has no phases", benchmark.name)));
    }

    let mut names = HashMap::new();
    for (index, phase) in benchmark.phases.iter().enumerate() {
        if names.insert(phase.name.as_str(), index).is_some() {
            return Err(invalid(format!("phase `{}` is declared twice", phase.name)));
        }
    }

    for phase in &benchmark.phases {
        for dependency in phase.dependencies() {
            if dependency == phase.name {
                return Err(invalid(format!("phase `{}` depends on itself", phase.name)));
            }
            if !names.contains_key(dependency) {
                return Err(invalid(format!(
                    "phase `{}` depends on unknown phase `{}`",
                    phase.name, dependency
                )));
            }
        }
        validate_model(phase)?;
        validate_durations(phase)?;
    }

    check_cycles(benchmark, &names)?;
    check_resource_groups(benchmark)
}

fn validate_model(phase: &PhaseDefinition) -> SchedulerResult<()> {
    let rate_ok = |rate: f64| rate.is_finite() && rate >= 0.0;
    match &phase.model {
        ModelConfig::Always { users: 0 } => {
            return Err(invalid(format!("phase `{}` keeps zero users running", phase.name)));
        }
        ModelConfig::Sequentially { repeats: 0 } => {
            return Err(invalid(format!("phase `{}` repeats zero times", phase.name)));
        }
        ModelConfig::ConstantRate { users_per_sec, .. } => {
            if !rate_ok(*users_per_sec) || *users_per_sec == 0.0 {
                return Err(invalid(format!(
                    "phase `{}` has invalid rate {}",
                    phase.name, users_per_sec
                )));
            }
        }
        ModelConfig::RampRate {
            initial_users_per_sec,
            target_users_per_sec,
            ..
        } => {
            if !rate_ok(*initial_users_per_sec)
                || !rate_ok(*target_users_per_sec)
                || (*initial_users_per_sec == 0.0 && *target_users_per_sec == 0.0)
            {
                return Err(invalid(format!(
                    "phase `{}` has invalid ramp {} -> {}",
                    phase.name, initial_users_per_sec, target_users_per_sec
                )));
            }
        }
        _ => {}
    }
    if let ModelConfig::ConstantRate {
        max_sessions: Some(0), ..
    }
    | ModelConfig::RampRate {
        max_sessions: Some(0), ..
    } = phase.model
    {
        return Err(invalid(format!("phase `{}` allows zero sessions", phase.name)));
    }
    Ok(())
}

fn validate_durations(phase: &PhaseDefinition) -> SchedulerResult<()> {
    let Some(duration) = phase.effective_duration() else {
        return Err(invalid(format!(
            "phase `{}` uses the {} model and needs a duration",
            phase.name,
            phase.model.kind()
        )));
    };
    if let Some(max) = phase.max_duration {
        if max < duration {
            return Err(invalid(format!(
                "phase `{}` has max duration {:?} shorter than duration {:?}",
                phase.name, max, duration
            )));
        }
    }
    Ok(())
}

fn check_cycles(
    benchmark: &BenchmarkDefinition,
    names: &HashMap<&str, usize>,
) -> SchedulerResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        index: usize,
        benchmark: &BenchmarkDefinition,
        names: &HashMap<&str, usize>,
        marks: &mut [Mark],
    ) -> SchedulerResult<()> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(invalid(format!(
                    "phase `{}` is part of a dependency cycle",
                    benchmark.phases[index].name
                )));
            }
            Mark::Unvisited => {}
        }
        marks[index] = Mark::InProgress;
        for dependency in benchmark.phases[index].dependencies() {
            if let Some(&next) = names.get(dependency) {
                visit(next, benchmark, names, marks)?;
            }
        }
        marks[index] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; benchmark.phases.len()];
    for index in 0..benchmark.phases.len() {
        visit(index, benchmark, names, &mut marks)?;
    }
    Ok(())
}

fn check_resource_groups(benchmark: &BenchmarkDefinition) -> SchedulerResult<()> {
    let mut groups: HashMap<&str, &PhaseDefinition> = HashMap::new();
    let mut shared = HashSet::new();
    for phase in &benchmark.phases {
        let key = phase.resource_key();
        match groups.get(key) {
            Some(first) => {
                if !Arc::ptr_eq(&first.scenario, &phase.scenario) {
                    return Err(invalid(format!(
                        "phases `{}` and `{}` share resources `{}` but not their scenario",
                        first.name, phase.name, key
                    )));
                }
                shared.insert(key);
            }
            None => {
                groups.insert(key, phase);
            }
        }
    }
    for key in shared {
        tracing::debug!("Resource group `{}` is shared by several phases", key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use std::time::Duration;

    fn phase(name: &str) -> crate::config::PhaseDefinitionBuilder {
        PhaseDefinition::builder(name, ModelConfig::at_once(1))
    }

    fn benchmark(phases: Vec<PhaseDefinition>) -> BenchmarkDefinition {
        let mut builder = BenchmarkDefinition::builder("test");
        for p in phases {
            builder = builder.phase(p);
        }
        // Skip `build()` so invalid definitions can be constructed.
        builder.definition
    }

    fn error_of(phases: Vec<PhaseDefinition>) -> String {
        match benchmark(phases).validate() {
            Err(SchedulerError::InvalidDefinition(message)) => message,
            other => panic!("expected invalid definition, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        assert!(error_of(vec![phase("a").build(), phase("a").build()]).contains("declared twice"));
        assert!(error_of(vec![phase("a").start_after("ghost").build()]).contains("unknown phase"));
        let own = phase("a").start_with("a", Duration::ZERO).build();
        assert!(error_of(vec![own]).contains("itself"));
        assert!(error_of(Vec::new()).contains("no phases"));
    }

    #[test]
    fn test_cycle_detected() {
        let message = error_of(vec![
            phase("a").start_after("c").build(),
            phase("b").start_after_strict("a").build(),
            phase("c").start_with("b", Duration::ZERO).build(),
        ]);
        assert!(message.contains("cycle"), "{message}");
    }

    #[test]
    fn test_model_parameters() {
        let open_error = |model| {
            error_of(vec![PhaseDefinition::builder("open", model)
                .duration(Duration::from_secs(1))
                .build()])
        };
        assert!(open_error(ModelConfig::constant_rate(0.0)).contains("invalid rate"));
        assert!(open_error(ModelConfig::constant_rate(f64::NAN)).contains("invalid rate"));
        assert!(open_error(ModelConfig::ramp_rate(0.0, 0.0)).contains("invalid ramp"));
        let capped = ModelConfig::constant_rate(1.0).with_max_sessions(0);
        assert!(open_error(capped).contains("zero sessions"));
        assert!(open_error(ModelConfig::sequentially(0)).contains("zero times"));
        assert!(open_error(ModelConfig::always(0)).contains("zero users"));
    }

    #[test]
    fn test_durations() {
        let no_duration = PhaseDefinition::builder("open", ModelConfig::constant_rate(1.0)).build();
        assert!(error_of(vec![no_duration]).contains("needs a duration"));

        let inverted = PhaseDefinition::builder("always", ModelConfig::always(1))
            .duration(Duration::from_secs(10))
            .max_duration(Duration::from_secs(5))
            .build();
        assert!(error_of(vec![inverted]).contains("shorter"));
    }

    #[test]
    fn test_shared_resources_need_one_scenario() {
        let scenario = Scenario::builder().build().expect("empty");
        let other = Scenario::builder().build().expect("empty");

        let ok = benchmark(vec![
            phase("a").shared_resources("g").scenario(scenario.clone()).build(),
            phase("b").shared_resources("g").scenario(scenario.clone()).build(),
        ]);
        ok.validate().expect("same scenario");

        let message = error_of(vec![
            phase("a").shared_resources("g").scenario(scenario).build(),
            phase("b").shared_resources("g").scenario(other).build(),
        ]);
        assert!(message.contains("share resources"));
    }
}
