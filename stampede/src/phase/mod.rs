//! Phases: time-bounded windows that decide when and how many sessions run.
//!
//! ```text
//! NOT_STARTED ──start()──► RUNNING ──finish()──► FINISHED
//!                             │                      │
//!                             └────terminate()───────┴──► TERMINATING
//!                                                              │
//!                       last session gone (counter closed) ◄───┘
//!                                    │
//!                               TERMINATED ──handler signal──► STATS_COMPLETE
//! ```
//!
//! `FINISHED` moves straight to `TERMINATED` once the last active session
//! completes. The active-session counter is closed by a single exchange when
//! it is zero, so a phase never terminates while a session is about to start.

mod active;
mod handler;
mod instance;
mod model;
mod status;

pub use active::ActiveState;
pub use handler::{
    CompletionSender, CompletionSignal, LoggingHandler, PhaseChange, PhaseChangeHandler,
};
pub use instance::{ExhaustionHook, PhaseInstance};
pub use status::PhaseStatus;

pub(crate) use instance::PhaseContext;
