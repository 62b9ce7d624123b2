//! Error taxonomy for task operations.
//!
//! Every kind carries a stable message. `Conflict` is the only kind retried
//! automatically, and only inside `TaskStore`; the rest propagate to the caller.

use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("write conflict: pointer moved {attempts} times, giving up")]
    Conflict { attempts: u32 },

    #[error("immutable: {0}")]
    Immutable(String),

    #[error("task already done: {0}")]
    AlreadyDone(String),

    #[error("id collision: exhausted {attempts} attempts")]
    IdCollision { attempts: u32 },

    #[error("executor not found: {0}")]
    ExecutorMissing(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;

impl TaskError {
    pub fn immutable(reason: impl Into<String>) -> Self {
        Self::Immutable(reason.into())
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => exit_codes::NOT_FOUND,
            Self::Conflict { .. } => exit_codes::CONFLICT,
            Self::Immutable(_) => exit_codes::IMMUTABLE,
            Self::AlreadyDone(_) => exit_codes::ALREADY_DONE,
            Self::IdCollision { .. } => exit_codes::ID_COLLISION,
            Self::ExecutorMissing(_) => exit_codes::EXECUTOR_MISSING,
            Self::Storage(_) => exit_codes::INVALID,
        }
    }
}

/// Map any CLI error to an exit code, falling back to `INVALID`.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<TaskError>()
        .map(TaskError::exit_code)
        .unwrap_or(exit_codes::INVALID)
}
