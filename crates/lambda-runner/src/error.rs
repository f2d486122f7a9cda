//! Runner error types. `Display` is the detail text sent to callers.

use lambda_core::protocol::{LOAD_FAILED_PREFIX, MISSING_ENTRYPOINT, NOT_LOADED, USER_CODE_PREFIX};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    /// Evaluating the source threw (syntax or top-level runtime error).
    #[error("{}{}", LOAD_FAILED_PREFIX, .0)]
    Execution(String),

    #[error("{}", MISSING_ENTRYPOINT)]
    MissingEntrypoint,

    #[error("execution engine is unavailable")]
    EngineUnavailable,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{}", NOT_LOADED)]
    NotLoaded,

    #[error("{}{}", USER_CODE_PREFIX, .0)]
    UserCode(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution engine is unavailable")]
    EngineUnavailable,
}
