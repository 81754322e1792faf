//! Error types for the scheduler.

use stampede_core::CoreError;
use thiserror::Error;

use crate::phase::PhaseStatus;

/// Errors raised by sessions, phases and the runner.
///
/// Errors are `Clone` so a phase can keep its first failure for reporting and
/// still hand a copy to the phase-change handler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    /// A declared variable was read before it was set.
    #[error("variable `{0}` is not set")]
    VariableNotSet(String),

    /// A variable was accessed without being declared during reservation.
    #[error("variable `{0}` was never declared")]
    UnknownVariable(String),

    /// A variable was accessed as the wrong type.
    #[error("variable `{name}` holds {actual} values, not {expected}")]
    TypeMismatch {
        /// Variable name.
        name: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type the variable was declared with.
        actual: &'static str,
    },

    /// A name was declared twice with different kinds.
    #[error("`{0}` is already declared with a different kind")]
    DuplicateDeclaration(String),

    /// A sequence-scoped access happened outside of a step invocation.
    #[error("`{0}` is sequence-scoped but no sequence is current")]
    NoCurrentSequence(String),

    /// A sequence-scoped slot does not exist for the current index.
    #[error("index {index} is out of range for sequence-scoped variable `{name}`")]
    IndexOutOfRange {
        /// Variable name.
        name: String,
        /// Offending index.
        index: usize,
    },

    /// A resource was accessed without being declared.
    #[error("resource `{0}` was never declared")]
    UnknownResource(String),

    /// A sequence was entered while another one was current.
    #[error("cannot enter sequence `{next}` while `{current}` is current")]
    SequenceAlreadyActive {
        /// Sequence that is current.
        current: String,
        /// Sequence that tried to become current.
        next: String,
    },

    /// The scenario has no sequence with this name.
    #[error("scenario has no sequence named `{0}`")]
    UnknownSequence(String),

    /// A step reported a failure.
    #[error("step failed: {0}")]
    StepFailed(String),

    /// A step panicked while the session was running.
    #[error("step panicked: {0}")]
    StepPanicked(String),

    /// A phase was asked to make a transition its status does not allow.
    #[error("phase `{phase}` cannot {action} while {status}")]
    IllegalPhaseTransition {
        /// Phase name.
        phase: String,
        /// Requested operation.
        action: &'static str,
        /// Status at the time of the request.
        status: PhaseStatus,
    },

    /// A session was offered a phase outside of its resource group.
    #[error("session {session} belongs to resource group `{expected}`, not `{actual}`")]
    ForeignResourceGroup {
        /// Session id.
        session: usize,
        /// Group the session was created for.
        expected: String,
        /// Group of the phase that tried to bind it.
        actual: String,
    },

    /// A benchmark definition failed validation.
    #[error("invalid benchmark definition: {0}")]
    InvalidDefinition(String),

    /// A benchmark definition could not be parsed.
    #[error("failed to parse benchmark definition: {0}")]
    Parse(String),

    /// Executor infrastructure failed.
    #[error("executor error: {0}")]
    Executor(String),

    /// The run was aborted by a fatal condition.
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl From<CoreError> for SchedulerError {
    fn from(err: CoreError) -> Self {
        SchedulerError::Executor(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Parse(err.to_string())
    }
}

/// A type alias for `Result<T, SchedulerError>`.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
