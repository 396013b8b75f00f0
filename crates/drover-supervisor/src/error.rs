//! Error types for the Drover supervision tree.

use thiserror::Error;

use drover_state::StateError;

/// Result type alias for supervision operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors that can occur while supervising processes.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Another live master already holds this name in the shared store.
    #[error("a master supervisor named {0} is already running on this host")]
    DuplicateMaster(String),

    /// Another live supervisor already holds this name in the shared store.
    #[error("a supervisor named {0} is already running")]
    DuplicateSupervisor(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}
