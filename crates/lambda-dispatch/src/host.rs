//! Client side of the runner's load/run protocol.
//!
//! The dispatcher never evaluates submitted source itself. It hands the text
//! to the runner inside an instance and only ever sees a [`RunOutcome`].

use std::time::Duration;

use async_trait::async_trait;
use lambda_runtime::ServiceAddress;
use serde_json::Value;

use crate::error::HostError;

/// Result of a `/run` call that reached the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Value),
    /// The entry point raised; carries the runner's detail text.
    UserError(String),
    /// The runner has nothing loaded (it was restarted or never loaded).
    NotLoaded,
}

/// Remote capability exposed by every instance.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Lightweight reachability check. Never errors.
    async fn probe(&self, address: &ServiceAddress, timeout: Duration) -> bool;

    /// Install `code`, replacing whatever was loaded before.
    ///
    /// A refusal to install (syntax error, missing entry point) is
    /// [`HostError::Rejected`]; everything else is transient.
    async fn load(&self, address: &ServiceAddress, code: &str, timeout: Duration)
    -> Result<(), HostError>;

    /// Invoke the loaded entry point with `input`.
    async fn run(
        &self,
        address: &ServiceAddress,
        input: &Value,
        timeout: Duration,
    ) -> Result<RunOutcome, HostError>;
}
