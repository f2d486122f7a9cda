//! Deadlines around container runtime calls.

use std::future::Future;
use std::time::Duration;

use lambda_runtime::{RuntimeError, RuntimeResult};

use crate::error::{DispatchError, DispatchResult};

/// Await `call` for at most `timeout`. An elapsed deadline surfaces as
/// [`RuntimeError::Timeout`] wrapped like any other runtime failure.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    target: &str,
    timeout: Duration,
    call: F,
) -> DispatchResult<T>
where
    F: Future<Output = RuntimeResult<T>>,
{
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout(timeout)),
    };
    result.map_err(|e| DispatchError::runtime(operation, target, e))
}
