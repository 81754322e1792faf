use thiserror::Error;

/// Errors raised while setting up executor infrastructure.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An executor thread could not be spawned.
    #[error("failed to spawn executor thread {index}: {source}")]
    ThreadSpawn {
        /// Index of the executor that failed to start.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An executor runtime could not be built.
    #[error("failed to build runtime for executor {index}: {reason}")]
    RuntimeBuild {
        /// Index of the executor that failed to start.
        index: usize,
        /// Description of the failure.
        reason: String,
    },

    /// The group was asked for zero executors.
    #[error("an event loop group needs at least one executor")]
    EmptyGroup,
}

/// A type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;
