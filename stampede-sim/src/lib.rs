//! # stampede-sim
//!
//! Deterministic, virtual-time event loops for testing the stampede scheduler.
//!
//! [`SimEventLoopGroup`] implements the same [`EventExecutor`] and [`Clock`]
//! providers as the tokio backend, but every executor feeds one ordered event
//! queue that the test drives explicitly. Time only moves when the test says
//! so, which makes arrival schedules, think times and forced terminations
//! reproducible to the nanosecond.
//!
//! ```ignore
//! use stampede_sim::SimEventLoopGroup;
//! use std::time::Duration;
//!
//! let sim = SimEventLoopGroup::new(2);
//! let loops = sim.loops();
//! loops.executor(0).schedule(Duration::from_millis(10), Box::new(|| {}));
//! sim.advance(Duration::from_millis(10));
//! assert_eq!(sim.tasks_executed(), 1);
//! ```
//!
//! [`EventExecutor`]: stampede_core::EventExecutor
//! [`Clock`]: stampede_core::Clock

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod event_loop;
mod queue;

pub use event_loop::{SimClock, SimEventLoopGroup, SimExecutor};
