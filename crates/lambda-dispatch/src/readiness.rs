//! Wait for a freshly created instance to accept traffic.

use lambda_core::config::ReadinessConfig;
use lambda_runtime::{RuntimeClient, ServiceAddress};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::host::HostClient;

/// Poll until the instance is running, has a published port, and answers
/// the health probe. Fails with [`DispatchError::ReadinessTimeout`] once
/// `config.timeout` has elapsed; no single inspect or probe runs past that
/// deadline.
pub async fn wait_ready(
    runtime: &dyn RuntimeClient,
    host: &dyn HostClient,
    instance: &str,
    config: &ReadinessConfig,
) -> DispatchResult<ServiceAddress> {
    let deadline = Instant::now() + config.timeout;
    let timed_out = || DispatchError::ReadinessTimeout {
        instance: instance.to_string(),
        timeout: config.timeout,
    };

    loop {
        let inspected = tokio::time::timeout_at(deadline, runtime.get_instance(instance))
            .await
            .map_err(|_| timed_out())?;

        match inspected {
            Ok(Some(handle)) => match handle.reachable_address() {
                Some(address) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let probe = host.probe(address, config.probe_timeout.min(remaining));
                    let answered = tokio::time::timeout_at(deadline, probe)
                        .await
                        .unwrap_or(false);
                    if answered {
                        debug!(%instance, %address, "instance ready");
                        return Ok(address.clone());
                    }
                    debug!(%instance, %address, "probe not answered yet");
                }
                None => debug!(%instance, status = ?handle.status, "waiting for port"),
            },
            Ok(None) => debug!(%instance, "instance not visible yet"),
            Err(e) => debug!(%instance, error = %e, "inspect failed while waiting"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out());
        }
        tokio::time::sleep(config.poll_interval.min(deadline - now)).await;
    }
}
