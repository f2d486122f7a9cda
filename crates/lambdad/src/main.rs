//! lambdad: runs submitted code in warm runner instances.
//!
//! Starts a dispatcher against the local Docker daemon, invokes the code,
//! prints one JSON result per line, and always tears the instances down.
//!
//! # Usage
//!
//! ```text
//! lambdad run --code demos/echo.js --input '{"message":"hi"}'
//! lambdad run --code demos/fibonacci.js --input '{"n":30}' --parallel 4 --repeat 5 --stats
//! lambdad fingerprint --code demos/echo.js
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use lambda_core::duration::{format_duration, parse_duration};
use lambda_core::{Fingerprint, LambdaConfig};
use lambda_dispatch::Dispatcher;

#[derive(Parser)]
#[command(name = "lambdad", about = "Lambda dispatcher")]
struct Cli {
    /// Path to lambda.toml. Defaults apply when omitted.
    #[arg(long, env = "LAMBDA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke a code file and print each result.
    Run {
        /// Source file defining `entrypoint(data)`.
        #[arg(long)]
        code: PathBuf,

        /// JSON payload passed to the entry point.
        #[arg(long, default_value = "{}")]
        input: String,

        /// Invocations per worker.
        #[arg(long, default_value = "1")]
        repeat: u32,

        /// Concurrent workers.
        #[arg(long, default_value = "1")]
        parallel: u32,

        /// Print pool and latency stats to stderr before shutting down.
        #[arg(long)]
        stats: bool,

        /// Image for new instances.
        #[arg(long)]
        image: Option<String>,

        /// Shared network name.
        #[arg(long)]
        network: Option<String>,

        /// Idle TTL before an instance is reclaimed (e.g. "30s").
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Print the fingerprint and instance name of a code file.
    Fingerprint {
        #[arg(long)]
        code: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            code,
            input,
            repeat,
            parallel,
            stats,
            image,
            network,
            ttl,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_overrides(&mut config, image, network, ttl.as_deref())?;
            let options = RunOptions {
                repeat: repeat.max(1),
                parallel: parallel.max(1),
                stats,
            };
            run_code(config, &code, &input, options).await
        }
        Command::Fingerprint { code } => {
            let source = read_code(&code)?;
            let fingerprint = Fingerprint::of(&source);
            println!("fingerprint: {fingerprint}");
            println!("instance:    {}", fingerprint.instance_name());
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,lambdad=debug,lambda_dispatch=debug")
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LambdaConfig> {
    match path {
        Some(path) => LambdaConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(LambdaConfig::default()),
    }
}

fn apply_overrides(
    config: &mut LambdaConfig,
    image: Option<String>,
    network: Option<String>,
    ttl: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(image) = image {
        config.dispatcher.image = image;
    }
    if let Some(network) = network {
        config.dispatcher.network = network;
    }
    if let Some(ttl) = ttl {
        config.dispatcher.ttl =
            parse_duration(ttl).with_context(|| format!("invalid --ttl value: {ttl}"))?;
    }
    config.validate()?;
    Ok(())
}

fn read_code(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[derive(Clone, Copy)]
struct RunOptions {
    repeat: u32,
    parallel: u32,
    stats: bool,
}

#[derive(Default)]
struct Summary {
    ok: usize,
    failed: usize,
    latencies: Vec<Duration>,
}

async fn run_code(
    config: LambdaConfig,
    code_path: &Path,
    input: &str,
    options: RunOptions,
) -> anyhow::Result<()> {
    let code: Arc<str> = read_code(code_path)?.into();
    let input: Arc<Value> =
        Arc::new(serde_json::from_str(input).context("--input is not valid JSON")?);

    let dispatcher = Dispatcher::connect_docker(config)
        .await
        .context("failed to start dispatcher")?;

    let work = Arc::clone(&dispatcher).scoped(move |d| run_workers(d, code, input, options));

    let summary = tokio::select! {
        joined = work => joined.context("dispatcher scope failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            dispatcher.shutdown().await;
            bail!("interrupted");
        }
    };

    info!(ok = summary.ok, failed = summary.failed, "done");
    if summary.failed > 0 {
        bail!("{} of {} invocations failed", summary.failed, summary.ok + summary.failed);
    }
    Ok(())
}

async fn run_workers(
    dispatcher: Arc<Dispatcher>,
    code: Arc<str>,
    input: Arc<Value>,
    options: RunOptions,
) -> Summary {
    let mut workers = Vec::with_capacity(options.parallel as usize);
    for worker in 0..options.parallel {
        let dispatcher = Arc::clone(&dispatcher);
        let code = Arc::clone(&code);
        let input = Arc::clone(&input);
        workers.push(tokio::spawn(async move {
            let mut summary = Summary::default();
            for _ in 0..options.repeat {
                let started = Instant::now();
                match dispatcher.run(&code, &input).await {
                    Ok(result) => {
                        summary.latencies.push(started.elapsed());
                        summary.ok += 1;
                        println!("{result}");
                    }
                    Err(e) => {
                        summary.failed += 1;
                        eprintln!("error: {e}");
                        if e.is_user_error() {
                            // Same code, same failure.
                            break;
                        }
                        warn!(worker, error = %e, "invocation failed");
                    }
                }
            }
            summary
        }));
    }

    let mut total = Summary::default();
    for worker in workers {
        match worker.await {
            Ok(summary) => {
                total.ok += summary.ok;
                total.failed += summary.failed;
                total.latencies.extend(summary.latencies);
            }
            Err(e) => {
                warn!(error = %e, "worker task failed");
                total.failed += 1;
            }
        }
    }

    if options.stats {
        print_stats(&dispatcher, &total);
    }
    total
}

fn print_stats(dispatcher: &Dispatcher, summary: &Summary) {
    eprintln!("pool: {} instance(s)", dispatcher.pool_len());
    let now = Instant::now();
    for entry in dispatcher.pooled() {
        let address = entry
            .address
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        eprintln!(
            "  {}  {:<22}  {:<9}  {:<21}  idle {}",
            entry.fingerprint,
            entry.instance_name,
            format!("{:?}", entry.state),
            address,
            format_duration(now.saturating_duration_since(entry.last_used)),
        );
    }

    if summary.latencies.is_empty() {
        return;
    }
    let mut sorted = summary.latencies.clone();
    sorted.sort();
    let total: Duration = sorted.iter().sum();
    let mean = total / sorted.len() as u32;
    eprintln!(
        "latency: n={} min={:?} mean={:?} max={:?}",
        sorted.len(),
        sorted[0],
        mean,
        sorted[sorted.len() - 1],
    );
}
