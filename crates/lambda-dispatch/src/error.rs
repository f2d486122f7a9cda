//! Dispatcher error types.

use std::time::Duration;

use lambda_core::ConfigError;
use lambda_runtime::RuntimeError;
use thiserror::Error;

/// Failures talking to the runner inside an instance.
#[derive(Debug, Error)]
pub enum HostError {
    /// Connect, write, or read failed before a full response arrived.
    #[error("connection to {address} failed: {message}")]
    Transport { address: String, message: String },

    /// No complete response within the per-request timeout.
    #[error("request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// Non-2xx answer that is not one of the runner's protocol errors.
    #[error("runner answered {status}: {detail}")]
    Status { status: u16, detail: String },

    /// 2xx answer whose body is not JSON, or a payload that cannot be encoded.
    #[error("undecodable runner response: {0}")]
    Decode(String),

    /// The runner answered `not_loaded` and a reload did not fix it.
    #[error("runner has no code loaded")]
    NotLoaded,

    /// The runner refused to install the submitted source.
    #[error("{0}")]
    Rejected(String),

    /// The loaded entry point raised.
    #[error("{0}")]
    UserCode(String),
}

impl HostError {
    /// Whether a retry against the same instance can succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, HostError::Rejected(_) | HostError::UserCode(_))
    }
}

/// Errors surfaced by [`Dispatcher::run`](crate::Dispatcher::run).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A new instance never became running, reachable, and healthy.
    #[error("instance {instance} was not ready within {timeout:?}")]
    ReadinessTimeout { instance: String, timeout: Duration },

    /// Every load attempt failed transiently. `source` is the last failure.
    #[error("code load failed after {attempts} attempts: {source}")]
    CodeLoadExhausted {
        attempts: u32,
        #[source]
        source: HostError,
    },

    /// Every invocation attempt failed transiently. The instance has been
    /// discarded. `source` is the last failure.
    #[error("invocation failed after {attempts} attempts: {source}")]
    InvocationExhausted {
        attempts: u32,
        #[source]
        source: HostError,
    },

    /// The submitted code was rejected at load or raised when invoked.
    /// Carries the runner's detail text verbatim.
    #[error("{0}")]
    UserCode(String),

    /// A container runtime call failed or timed out.
    #[error("runtime operation `{operation}` for {instance} failed: {source}")]
    RuntimeOperation {
        operation: &'static str,
        instance: String,
        #[source]
        source: RuntimeError,
    },

    /// Called after [`Dispatcher::shutdown`](crate::Dispatcher::shutdown).
    #[error("dispatcher has been shut down")]
    ShutDown,

    /// The task spawned by [`Dispatcher::scoped`](crate::Dispatcher::scoped)
    /// was cancelled.
    #[error("scoped task was cancelled before completing")]
    ScopeAborted,

    /// The configuration failed validation at start.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DispatchError {
    pub(crate) fn runtime(operation: &'static str, instance: &str, source: RuntimeError) -> Self {
        Self::RuntimeOperation {
            operation,
            instance: instance.to_string(),
            source,
        }
    }

    /// True for failures of the submitted code rather than the infrastructure.
    pub fn is_user_error(&self) -> bool {
        matches!(self, DispatchError::UserCode(_))
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
