//! Drive an open-model phase against a scenario that only thinks.
//!
//! Useful to see throttling and coordinated-omission correction at work:
//! with a rate above `max_sessions / think time`, arrivals queue up and the
//! reported latency grows with the queueing delay.
//!
//! ```text
//! cargo run --bin overload -- --rate 50 --max-sessions 5 --think-ms 200
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use stampede::{
    BenchmarkDefinition, ModelConfig, PhaseDefinition, PoolKind, Runner, Scenario, SchedulerResult,
    SequenceBuilder,
    SessionCore, ThinkTime, WatchdogConfig,
};
use stampede_core::TokioEventLoopGroup;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Pool {
    Elastic,
    Affinity,
}

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "overload")]
#[command(about = "Open-model arrivals against a fixed think time", long_about = None)]
struct Args {
    /// Arrivals per second
    #[arg(long, default_value = "20")]
    rate: f64,

    /// Phase duration in milliseconds
    #[arg(long, default_value = "5000")]
    duration_ms: u64,

    /// Forced termination after this many milliseconds
    #[arg(long)]
    max_duration_ms: Option<u64>,

    /// Sessions admitted at once (defaults to the rounded-up rate)
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Think time of every session in milliseconds
    #[arg(long, default_value = "100")]
    think_ms: u64,

    /// Number of event loop threads
    #[arg(long, default_value = "2")]
    executors: usize,

    /// Session pool strategy
    #[arg(long, value_enum, default_value = "elastic")]
    pool: Pool,

    /// Seed for Poisson arrivals
    #[arg(long)]
    seed: Option<u64>,

    /// Use Poisson instead of evenly spaced arrivals
    #[arg(long)]
    poisson: bool,

    /// Benchmark JSON to run instead of the flags above; every phase runs
    /// the think-time scenario
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn scenario(think: Duration) -> SchedulerResult<std::sync::Arc<Scenario>> {
    Scenario::builder()
        .phase("overload")
        .initial(
            SequenceBuilder::new("visit")
                .step(|s: &mut SessionCore| -> SchedulerResult<bool> {
                    s.statistics("visit").record_request();
                    Ok(true)
                })
                .step(ThinkTime::new("visit.think", think))
                .step(|s: &mut SessionCore| -> SchedulerResult<bool> {
                    let latency = s.now().saturating_sub(s.start_time());
                    s.statistics("visit").record_response(latency);
                    Ok(true)
                }),
        )
        .build()
}

fn definition(args: &Args) -> Result<BenchmarkDefinition, Box<dyn std::error::Error>> {
    let scenario = scenario(Duration::from_millis(args.think_ms))?;
    if let Some(path) = &args.config {
        let json = std::fs::read_to_string(path)?;
        let definition = BenchmarkDefinition::from_json(&json)?.with_default_scenario(scenario);
        definition.validate()?;
        return Ok(definition);
    }

    let mut model = ModelConfig::constant_rate(args.rate);
    if let Some(max) = args.max_sessions {
        model = model.with_max_sessions(max);
    }
    if args.poisson {
        model = model.with_variance();
    }
    let mut phase = PhaseDefinition::builder("overload", model)
        .duration(Duration::from_millis(args.duration_ms))
        .scenario(scenario);
    if let Some(max) = args.max_duration_ms {
        phase = phase.max_duration(Duration::from_millis(max));
    }

    let mut benchmark = BenchmarkDefinition::builder("overload")
        .phase(phase.build())
        .pool(match args.pool {
            Pool::Elastic => PoolKind::Elastic,
            Pool::Affinity => PoolKind::Affinity,
        })
        .watchdog(WatchdogConfig::default());
    if let Some(seed) = args.seed {
        benchmark = benchmark.seed(seed);
    }
    Ok(benchmark.build()?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    if args.executors == 0 {
        return Err("Number of executors must be at least 1".into());
    }

    let definition = definition(&args)?;
    tracing::info!(
        phases = definition.phases.len(),
        executors = args.executors,
        "Starting benchmark `{}`",
        definition.name
    );

    let group = TokioEventLoopGroup::start(args.executors)?;
    let mut runner = Runner::builder(definition, group.loops()).build()?;
    let result = runner.run().await;
    let report = runner.report();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    drop(runner);
    group.shutdown();

    result?;
    Ok(())
}
