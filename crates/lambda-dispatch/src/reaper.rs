//! Background task evicting instances left idle beyond the TTL.

use std::sync::Arc;
use std::time::Duration;

use lambda_runtime::RuntimeClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pool::InstancePool;
use crate::runtime_call::bounded;

/// Handle to the running reaper loop.
///
/// Dropping the handle aborts the loop; [`Reaper::stop`] lets the current
/// sweep finish first.
pub struct Reaper {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn spawn(
        pool: InstancePool,
        runtime: Arc<dyn RuntimeClient>,
        ttl: Duration,
        interval: Duration,
        runtime_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            run_reaper_loop(pool, runtime, ttl, interval, runtime_timeout, shutdown_rx).await;
        });
        info!(ttl = ?ttl, interval = ?interval, "idle reaper started");
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Signal the loop and wait for the current sweep to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "idle reaper ended abnormally");
            }
        }
        debug!("idle reaper stopped");
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(true);
            handle.abort();
        }
    }
}

async fn run_reaper_loop(
    pool: InstancePool,
    runtime: Arc<dyn RuntimeClient>,
    ttl: Duration,
    interval: Duration,
    runtime_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                sweep(&pool, runtime.as_ref(), ttl, runtime_timeout).await;
            }
            _ = shutdown.changed() => {
                debug!("idle reaper shutting down");
                break;
            }
        }
    }
}

/// One eviction pass. Returns the number of instances evicted.
///
/// Entries that are being created or have in-flight invocations are skipped;
/// the runtime removal happens under the fingerprint's creation lock and is
/// abandoned after `runtime_timeout`.
pub async fn sweep(
    pool: &InstancePool,
    runtime: &dyn RuntimeClient,
    ttl: Duration,
    runtime_timeout: Duration,
) -> usize {
    let mut evicted = 0;

    for fingerprint in pool.expired(Instant::now(), ttl) {
        let lock = pool.creation_lock(&fingerprint);
        let Ok(guard) = lock.try_lock() else {
            debug!(%fingerprint, "busy, skipping eviction");
            continue;
        };

        if let Some(entry) = pool.remove_if_expired(&fingerprint, Instant::now(), ttl) {
            let name = &entry.instance_name;
            let removed =
                bounded("remove_instance", name, runtime_timeout, runtime.remove_instance(name)).await;
            if let Err(e) = removed {
                warn!(instance = %entry.instance_name, error = %e, "failed to remove idle instance");
            }
            info!(%fingerprint, instance = %entry.instance_name, "evicted idle instance");
            evicted += 1;
        }

        drop(guard);
        drop(lock);
        pool.prune_lock(&fingerprint);
    }

    evicted
}
