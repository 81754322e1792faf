//! # stampede-core
//!
//! Provider abstractions shared by the stampede scheduler and its
//! deterministic simulation backend.
//!
//! The scheduler never touches threads or wall-clock time directly. It talks
//! to a small set of providers so the same code runs on real tokio event loops
//! in production and on virtual-time executors in tests:
//!
//! - [`Clock`]: monotonic time since the clock's epoch
//! - [`EventExecutor`]: a single-threaded task queue ("event loop")
//! - [`EventLoops`]: a fixed group of executors sharing one clock, with
//!   round-robin selection
//! - [`SeededRandom`]: reproducible randomness for arrival jitter
//!
//! ## Executor Affinity
//!
//! Every executor thread publishes its index through a thread-local (see
//! [`current_executor_id`]). Pools use it to take the contention-free path
//! when the caller already runs on the executor that owns a queue.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 EventLoops                    │
//! │  clock ──► Arc<dyn Clock>                     │
//! │  [0] ──► EventExecutor (thread / sim lane)    │
//! │  [1] ──► EventExecutor                        │
//! │  ...                                          │
//! └───────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod clock;
mod error;
mod executor;
mod executor_id;
mod random;
mod tokio_loops;

pub use clock::{Clock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use executor::{EventExecutor, EventLoops, Task};
pub use executor_id::{current_executor_id, set_current_executor_id};
pub use random::{random_index, SeededRandom};
pub use tokio_loops::{TokioEventLoopGroup, TokioExecutor};
