//! # stampede
//!
//! Virtual-user scheduling core for load generation.
//!
//! A benchmark is a set of [`phases`](phase) that decide when synthetic users
//! ("sessions") are created. Each [`Session`] is a pooled execution context
//! pinned to one executor; it runs the sequences of its [`Scenario`] as a
//! cooperative state machine that never blocks a thread. The [`Runner`]
//! starts, finishes and terminates phases against the group clock and their
//! inter-phase dependencies.
//!
//! ```text
//! Runner ──start/finish/terminate──► PhaseInstance ──acquire──► SessionPool
//!                                         ▲                        │
//!                                         │ notify_finished        ▼
//!                                         └──────────────────── Session ──► steps
//! ```
//!
//! ## Arrival models
//!
//! Closed models ([`ModelConfig::AtOnce`], [`ModelConfig::Always`],
//! [`ModelConfig::Sequentially`]) keep a fixed number of sessions busy. Open
//! models ([`ModelConfig::ConstantRate`], [`ModelConfig::RampRate`]) create
//! sessions at the times a [`RateGenerator`] computes, regardless of how long
//! sessions take. Arrivals that find no free session are throttled and started
//! later with their original arrival time as the session start time, so
//! latencies measured from [`SessionCore::start_time`] include the queueing
//! delay.
//!
//! ## Executors
//!
//! The scheduler runs on any [`EventLoops`](stampede_core::EventLoops): real
//! tokio loops from [`TokioEventLoopGroup`](stampede_core::TokioEventLoopGroup)
//! or the deterministic virtual-time loops of the `stampede-sim` crate.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod phase;
pub mod pool;
pub mod rate;
pub mod runner;
pub mod scenario;
pub mod sequence;
pub mod session;
pub mod shared;
pub mod stats;
pub mod steps;
pub mod watchdog;

pub use config::{BenchmarkDefinition, ModelConfig, PhaseDefinition, PoolConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use phase::{CompletionSignal, PhaseChange, PhaseChangeHandler, PhaseInstance, PhaseStatus};
pub use pool::{AffinityPool, DepletionPolicy, ElasticPool, PoolKind, SessionPool};
pub use rate::RateGenerator;
pub use runner::{AbortHandle, PhaseReport, RunReport, Runner};
pub use scenario::{ResourceUtilizer, Scenario, SequenceBuilder};
pub use sequence::{SequenceTemplate, Step};
pub use session::{Session, SessionCore, SessionResource};
pub use shared::SharedResources;
pub use stats::{Statistics, StatisticsRegistry};
pub use steps::{StartSequence, ThinkTime};
pub use watchdog::{Watchdog, WatchdogConfig};
