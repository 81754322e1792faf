//! Phase models driven on virtual time.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stampede::phase::{ActiveState, PhaseStatus};
use stampede::{
    BenchmarkDefinition, ModelConfig, PhaseDefinition, Runner, Scenario, SchedulerError,
    SchedulerResult, SequenceBuilder, SessionCore, ThinkTime,
};
use stampede_sim::SimEventLoopGroup;

use common::{blocked, counter, init_tracing, noop, run_to_completion, run_until, step, Transitions};

fn scenario(sequence: SequenceBuilder) -> Arc<Scenario> {
    Scenario::builder().initial(sequence).build().expect("valid scenario")
}

#[test]
fn test_at_once_starts_all_sessions_synchronously() {
    init_tracing();
    let sim = SimEventLoopGroup::new(2);
    let definition = BenchmarkDefinition::builder("at-once")
        .phase(
            PhaseDefinition::builder("burst", ModelConfig::at_once(5))
                .scenario(scenario(SequenceBuilder::new("s").step(noop)))
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let mut runner = Runner::builder(definition, sim.loops()).build().expect("runner");

    assert_eq!(runner.tick(), Some(Duration::ZERO));
    let phase = runner.phase("burst").expect("declared").clone();
    assert_eq!(phase.status(), PhaseStatus::Running);
    assert_eq!(phase.active_sessions(), 5);

    let report = run_to_completion(&sim, &mut runner, Duration::from_secs(1));
    assert_eq!(phase.status(), PhaseStatus::StatsComplete);
    assert_eq!(phase.active_state(), ActiveState::Closed);
    let burst = report.phase("burst").expect("reported");
    assert_eq!(burst.max_used_sessions, 5);
    assert!(!burst.session_limit_exceeded);
    assert!(report.is_success());
}

#[test]
fn test_always_restarts_while_running() {
    init_tracing();
    let sim = SimEventLoopGroup::new(1);
    let completions = Arc::new(AtomicUsize::new(0));
    let definition = BenchmarkDefinition::builder("always")
        .phase(
            PhaseDefinition::builder("steady", ModelConfig::always(2))
                .duration(Duration::from_millis(300))
                .scenario(scenario(
                    SequenceBuilder::new("s")
                        .step(ThinkTime::new("think", Duration::from_millis(100)))
                        .step(counter(completions.clone())),
                ))
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let transitions = Transitions::default();
    let mut runner = Runner::builder(definition, sim.loops())
        .handler(transitions.handler(sim.loops().clock().clone()))
        .build()
        .expect("runner");

    run_to_completion(&sim, &mut runner, Duration::from_secs(5));

    // Runs start at 0, 100, 200 and 300 ms; the last one completes after the
    // phase finished and is not restarted.
    assert_eq!(completions.load(Ordering::SeqCst), 8);
    assert_eq!(
        transitions.time_of("steady", PhaseStatus::Finished),
        Some(Duration::from_millis(300))
    );
    assert_eq!(
        transitions.time_of("steady", PhaseStatus::Terminated),
        Some(Duration::from_millis(400))
    );
    assert_eq!(
        transitions.statuses("steady"),
        vec![
            PhaseStatus::Running,
            PhaseStatus::Finished,
            PhaseStatus::Terminated,
            PhaseStatus::StatsComplete
        ]
    );
}

#[test]
fn test_sequentially_terminates_after_repeats() {
    init_tracing();
    let sim = SimEventLoopGroup::new(2);
    let completions = Arc::new(AtomicUsize::new(0));
    let definition = BenchmarkDefinition::builder("sequentially")
        .phase(
            PhaseDefinition::builder("repeat", ModelConfig::sequentially(3))
                .scenario(scenario(
                    SequenceBuilder::new("s")
                        .step(ThinkTime::new("think", Duration::from_millis(10)))
                        .step(counter(completions.clone())),
                ))
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let mut runner = Runner::builder(definition, sim.loops()).build().expect("runner");

    let report = run_to_completion(&sim, &mut runner, Duration::from_secs(1));
    assert_eq!(completions.load(Ordering::SeqCst), 3);
    assert_eq!(sim.now(), Duration::from_millis(30));
    let repeat = report.phase("repeat").expect("reported");
    assert_eq!(repeat.max_used_sessions, 1);
    assert_eq!(repeat.status, PhaseStatus::StatsComplete);
}

#[test]
fn test_noop_phase_creates_no_sessions() {
    init_tracing();
    let sim = SimEventLoopGroup::new(1);
    let definition = BenchmarkDefinition::builder("noop")
        .phase(PhaseDefinition::builder("anchor", ModelConfig::Noop).build())
        .build()
        .expect("valid benchmark");
    let mut runner = Runner::builder(definition, sim.loops()).build().expect("runner");

    let report = run_to_completion(&sim, &mut runner, Duration::from_secs(1));
    assert_eq!(runner.groups()[0].factory().created(), 0);
    assert_eq!(report.phase("anchor").map(|p| p.status), Some(PhaseStatus::StatsComplete));
}

#[test]
fn test_exhausted_pool_sets_session_limit_flag() {
    init_tracing();
    let sim = SimEventLoopGroup::new(1);
    let shared = scenario(SequenceBuilder::new("s").step(blocked));
    let definition = BenchmarkDefinition::builder("exhaustion")
        .phase(
            PhaseDefinition::builder("first", ModelConfig::at_once(2))
                .shared_resources("users")
                .scenario(shared.clone())
                .build(),
        )
        .phase(
            PhaseDefinition::builder("second", ModelConfig::at_once(2))
                .shared_resources("users")
                .start_with("first", Duration::ZERO)
                .scenario(shared)
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let exhausted = Arc::new(Mutex::new(Vec::new()));
    let hook_log = exhausted.clone();
    let mut runner = Runner::builder(definition, sim.loops())
        .on_session_limit(Arc::new(move |phase: &stampede::PhaseInstance| {
            hook_log.lock().push(phase.name().to_string());
        }))
        .build()
        .expect("runner");

    // Both phases share one pool sized for the larger of them.
    assert_eq!(runner.groups().len(), 1);
    assert_eq!(runner.groups()[0].factory().created(), 2);

    assert!(run_until(&sim, &mut runner, Duration::from_millis(10)));
    let first = runner.phase("first").expect("declared").clone();
    let second = runner.phase("second").expect("declared").clone();

    assert_eq!(*exhausted.lock(), vec!["second".to_string(), "second".to_string()]);
    assert!(second.session_limit_exceeded());
    assert!(!first.session_limit_exceeded());
    assert_eq!(second.status(), PhaseStatus::Terminated);
    assert_eq!(first.status(), PhaseStatus::Finished);
    assert_eq!(first.active_sessions(), 2);

    first.terminate();
    let report = run_to_completion(&sim, &mut runner, Duration::from_secs(5));
    assert!(report.phase("second").map_or(false, |p| p.session_limit_exceeded));
    assert_eq!(report.phase("first").map(|p| p.status), Some(PhaseStatus::StatsComplete));
}

#[test]
fn test_terminate_wakes_each_blocked_session_once() {
    init_tracing();
    let sim = SimEventLoopGroup::new(2);
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = invocations.clone();
    let definition = BenchmarkDefinition::builder("blocked")
        .phase(
            PhaseDefinition::builder("stuck", ModelConfig::at_once(4))
                .scenario(scenario(SequenceBuilder::new("s").step(
                    move |_: &mut SessionCore| -> SchedulerResult<bool> {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(false)
                    },
                )))
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let mut runner = Runner::builder(definition, sim.loops()).build().expect("runner");

    assert!(step(&sim, &mut runner));
    assert!(step(&sim, &mut runner));
    let phase = runner.phase("stuck").expect("declared").clone();
    assert_eq!(phase.status(), PhaseStatus::Finished);
    assert_eq!(phase.active_sessions(), 4);
    assert_eq!(invocations.load(Ordering::SeqCst), 4);
    assert_eq!(sim.pending(), 0);

    let before = sim.tasks_executed();
    phase.terminate();
    assert_eq!(phase.status(), PhaseStatus::Terminating);
    assert_eq!(sim.pending(), 4);
    sim.run_ready();

    assert_eq!(sim.tasks_executed() - before, 4);
    assert_eq!(phase.status(), PhaseStatus::Terminated);
    assert_eq!(phase.active_sessions(), 0);
    // Draining does not invoke steps again.
    assert_eq!(invocations.load(Ordering::SeqCst), 4);
}

#[test]
fn test_open_model_throttles_and_keeps_intended_start() {
    init_tracing();
    let sim = SimEventLoopGroup::new(2);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let record = starts.clone();
    let definition = BenchmarkDefinition::builder("overload")
        .phase(
            PhaseDefinition::builder("open", ModelConfig::constant_rate(10.0).with_max_sessions(2))
                .duration(Duration::from_secs(1))
                .max_duration(Duration::from_secs(60))
                .scenario(scenario(
                    SequenceBuilder::new("s")
                        .step(ThinkTime::new("think", Duration::from_secs(5)))
                        .step(move |s: &mut SessionCore| -> SchedulerResult<bool> {
                            record.lock().push(s.start_time());
                            let latency = s.now().saturating_sub(s.start_time());
                            s.statistics("visit").record_response(latency);
                            Ok(true)
                        }),
                ))
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let mut runner = Runner::builder(definition, sim.loops()).build().expect("runner");
    let phase = runner.phase("open").expect("declared").clone();

    assert!(run_until(&sim, &mut runner, Duration::from_millis(950)));
    assert_eq!(phase.active_sessions(), 2);
    assert!(phase.throttled_users() > 0);
    assert!(phase.session_limit_exceeded());

    let report = run_to_completion(&sim, &mut runner, Duration::from_secs(60));
    let open = report.phase("open").expect("reported");
    assert!(open.peak_throttled_users >= 8, "peak was {}", open.peak_throttled_users);
    assert_eq!(open.throttled_users, 0);
    assert!(open.error.is_none());
    assert_eq!(open.max_used_sessions, 2);

    let mut starts = starts.lock().clone();
    assert!(starts.len() >= 10, "only {} completions", starts.len());
    starts.sort();
    let phase_start = phase.absolute_start().expect("started");
    for (k, start) in starts.iter().enumerate() {
        assert_eq!(*start, phase_start + Duration::from_millis(100) * k as u32);
    }

    // Queueing delay counts towards latency.
    let visit = &report.statistics[0];
    assert_eq!(visit.metric, "visit");
    assert!(visit.snapshot.max_latency_ns > Some(20_000_000_000));
}

#[test]
fn test_illegal_transitions_are_rejected() {
    init_tracing();
    let sim = SimEventLoopGroup::new(1);
    let definition = BenchmarkDefinition::builder("transitions")
        .phase(
            PhaseDefinition::builder("live", ModelConfig::always(1))
                .duration(Duration::from_secs(1))
                .scenario(scenario(SequenceBuilder::new("s").step(blocked)))
                .build(),
        )
        .phase(
            PhaseDefinition::builder("later", ModelConfig::at_once(1))
                .start_after_strict("live")
                .scenario(scenario(SequenceBuilder::new("s").step(noop)))
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let mut runner = Runner::builder(definition, sim.loops()).build().expect("runner");
    runner.tick();
    let live = runner.phase("live").expect("declared").clone();
    let later = runner.phase("later").expect("declared").clone();
    assert_eq!(live.status(), PhaseStatus::Running);

    assert_eq!(
        live.start(),
        Err(SchedulerError::IllegalPhaseTransition {
            phase: "live".to_string(),
            action: "start",
            status: PhaseStatus::Running,
        })
    );
    assert_eq!(live.status(), PhaseStatus::Running);
    assert_eq!(live.active_sessions(), 1);

    // Finishing a phase that never started changes nothing.
    later.finish();
    assert_eq!(later.status(), PhaseStatus::NotStarted);

    live.terminate();
    let report = run_to_completion(&sim, &mut runner, Duration::from_secs(5));
    assert_eq!(report.phase("later").map(|p| p.status), Some(PhaseStatus::StatsComplete));

    live.finish();
    live.terminate();
    assert_eq!(live.status(), PhaseStatus::StatsComplete);
    assert!(matches!(
        live.start(),
        Err(SchedulerError::IllegalPhaseTransition {
            status: PhaseStatus::StatsComplete,
            ..
        })
    ));
}

#[test]
fn test_ramp_rate_accelerates_arrivals() {
    init_tracing();
    let sim = SimEventLoopGroup::new(2);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let record = starts.clone();
    let definition = BenchmarkDefinition::builder("ramp")
        .phase(
            PhaseDefinition::builder("ramp", ModelConfig::ramp_rate(10.0, 30.0))
                .duration(Duration::from_secs(1))
                .scenario(scenario(SequenceBuilder::new("s").step(
                    move |s: &mut SessionCore| -> SchedulerResult<bool> {
                        record.lock().push(s.start_time());
                        Ok(true)
                    },
                )))
                .build(),
        )
        .build()
        .expect("valid benchmark");
    let mut runner = Runner::builder(definition, sim.loops()).build().expect("runner");
    // The cap follows the higher of both rates.
    assert_eq!(runner.groups()[0].factory().created(), 30);

    let report = run_to_completion(&sim, &mut runner, Duration::from_secs(2));
    let ramp = report.phase("ramp").expect("reported");
    assert!(!ramp.session_limit_exceeded);
    assert_eq!(ramp.peak_throttled_users, 0);

    let phase_start = runner.phase("ramp").and_then(|p| p.absolute_start()).expect("started");
    let mut offsets: Vec<Duration> = starts.lock().iter().map(|s| *s - phase_start).collect();
    offsets.sort();
    // 10t + 10t² arrivals by time t: 20 during the second, plus the one at 0.
    assert!((20..=21).contains(&offsets.len()), "{} arrivals", offsets.len());
    assert_eq!(offsets[0], Duration::ZERO);
    // Arrival 5 lands where 10t + 10t² = 5, at about 366 ms.
    let fifth = offsets[5].as_secs_f64();
    assert!((fifth - 0.366).abs() < 0.001, "fifth arrival at {fifth}");

    let first_gap = offsets[1] - offsets[0];
    let last_gap = offsets[offsets.len() - 1] - offsets[offsets.len() - 2];
    assert!(first_gap > Duration::from_millis(80), "{first_gap:?}");
    assert!(last_gap < Duration::from_millis(40), "{last_gap:?}");
}
