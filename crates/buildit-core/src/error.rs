//! Error types for BuildIt.

use thiserror::Error;

use crate::id::BuildIdentity;
use crate::status::State;

#[derive(Debug, Error)]
pub enum Error {
    #[error("build {0} is already running")]
    DuplicateTask(BuildIdentity),

    #[error("invalid status transition for build {identity}: {from} -> {to}")]
    InvalidTransition {
        identity: BuildIdentity,
        from: State,
        to: State,
    },

    #[error("build {0} was already completed")]
    AlreadyCompleted(BuildIdentity),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
