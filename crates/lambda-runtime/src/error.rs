//! Runtime client error types.

use std::time::Duration;

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container engine socket could not be opened.
    #[error("failed to connect to container engine: {0}")]
    Connect(String),

    /// The engine answered an API call with an error.
    #[error("runtime operation `{operation}` on `{target}` failed: {message}")]
    Operation {
        /// Engine API call, e.g. `create_container`.
        operation: &'static str,
        /// Container, image, or network the call was about.
        target: String,
        message: String,
    },

    /// The call did not complete within the caller's deadline.
    #[error("no answer from the container engine within {0:?}")]
    Timeout(Duration),
}

impl RuntimeError {
    pub fn operation(operation: &'static str, target: &str, message: impl ToString) -> Self {
        Self::Operation {
            operation,
            target: target.to_string(),
            message: message.to_string(),
        }
    }
}
