//! Idle monitor: signals shutdown once the host has seen no activity for the TTL.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::host::ExecutionHost;

const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// `None` for a non-positive TTL, which disables the monitor.
pub fn idle_ttl_from_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

/// Spawn the monitor. It sends `true` on `shutdown` and exits once idle
/// beyond `ttl`, or exits quietly when `shutdown` fires first.
pub fn spawn_idle_monitor(
    host: Arc<ExecutionHost>,
    ttl: Duration,
    shutdown: watch::Sender<bool>,
) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    info!(ttl = ?ttl, "idle monitor started");

    tokio::spawn(async move {
        loop {
            let idle = host.idle_for();
            if idle > ttl {
                info!(idle = ?idle, "no activity, shutting down");
                let _ = shutdown.send(true);
                break;
            }

            let wait = (ttl - idle).min(CHECK_INTERVAL).max(Duration::from_millis(1));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_ttl_disables() {
        assert_eq!(idle_ttl_from_secs(0), None);
        assert_eq!(idle_ttl_from_secs(-5), None);
        assert_eq!(idle_ttl_from_secs(60), Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_ttl() {
        let host = Arc::new(ExecutionHost::new().unwrap());
        let (tx, mut rx) = watch::channel(false);
        let handle = spawn_idle_monitor(host, Duration::from_secs(5), tx);

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_shutdown() {
        let host = Arc::new(ExecutionHost::new().unwrap());
        let (tx, rx) = watch::channel(false);
        let _handle = spawn_idle_monitor(host.clone(), Duration::from_secs(5), tx);

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            host.touch();
        }
        assert!(!*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn external_shutdown_stops_monitor() {
        let host = Arc::new(ExecutionHost::new().unwrap());
        let (tx, _rx) = watch::channel(false);
        let handle = spawn_idle_monitor(host, Duration::from_secs(60), tx.clone());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
