//! lambda-runner: serves the load/run protocol on one port.
//!
//! ```text
//! lambda-runner --port 8080 --idle-ttl 60
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use lambda_runner::idle::{idle_ttl_from_secs, spawn_idle_monitor};
use lambda_runner::{ExecutionHost, build_router};

#[derive(Parser)]
#[command(name = "lambda-runner", about = "Lambda execution host")]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "RUNNER_PORT", default_value = "8080")]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "RUNNER_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Exit after this many seconds without a load or run. `<= 0` disables.
    #[arg(long, env = "RUNNER_IDLE_TTL", default_value = "60", allow_negative_numbers = true)]
    idle_ttl: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,lambda_runner=debug")),
        )
        .init();

    let cli = Cli::parse();

    let host = Arc::new(ExecutionHost::new().context("failed to start JS engine")?);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let monitor = match idle_ttl_from_secs(cli.idle_ttl) {
        Some(ttl) => Some(spawn_idle_monitor(host.clone(), ttl, shutdown_tx.clone())),
        None => {
            info!("idle monitor disabled");
            None
        }
    };

    let addr = SocketAddr::new(cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "runner listening");

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = signal_tx.send(true);
        }
    });

    axum::serve(listener, build_router(host))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(monitor) = monitor {
        let _ = monitor.await;
    }

    info!("runner stopped");
    Ok(())
}
