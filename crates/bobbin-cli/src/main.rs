use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bobbin_core::{
    AbortSignal, Orchestrator, OrchestratorConfig, Priority, RequestOptions, Task, TaskError,
};

#[derive(Debug, Parser)]
#[command(name = "bobbin", version, about = "Request orchestrator demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive an orchestrator against a simulated flaky backend.
    Run(RunArgs),
    /// Print the effective configuration (defaults <- file <- BOBBIN_* env).
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Number of requests to submit.
    #[arg(long, default_value_t = 20)]
    requests: usize,

    /// Overrides `max_concurrent` from the configuration.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Probability that a simulated call fails with a 503.
    #[arg(long, default_value_t = 0.2)]
    failure_rate: f64,

    /// Probability that a simulated call is throttled with a 429.
    #[arg(long, default_value_t = 0.05)]
    overload_rate: f64,

    /// Mean latency of a simulated call, in milliseconds.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Comma-separated namespaces; requests are spread across them.
    #[arg(long, value_delimiter = ',', default_value = "default")]
    namespaces: Vec<String>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print every orchestrator event as a JSON line.
    #[arg(long, default_value_t = false)]
    events: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Reply {
    id: String,
    latency_ms: u64,
}

/// Simulated backend call with random latency and failures.
struct FlakyBackend {
    id: String,
    failure_rate: f64,
    overload_rate: f64,
    latency_ms: u64,
}

#[async_trait]
impl Task<Reply> for FlakyBackend {
    async fn run(&self, signal: AbortSignal) -> Result<Reply, TaskError> {
        // ThreadRng is not Send: draw everything before the first await
        let (latency, roll) = {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0..=self.latency_ms);
            (self.latency_ms / 2 + jitter, rng.gen_range(0.0..1.0))
        };

        tokio::select! {
            () = sleep(Duration::from_millis(latency)) => {}
            () = signal.aborted() => return Err(TaskError::Aborted),
        }

        if roll < self.overload_rate {
            Err(TaskError::status(429, "too many requests"))
        } else if roll < self.overload_rate + self.failure_rate {
            Err(TaskError::status(503, "service unavailable"))
        } else {
            Ok(Reply {
                id: self.id.clone(),
                latency_ms: latency,
            })
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<OrchestratorConfig> {
    let base = match path {
        Some(path) => OrchestratorConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };
    base.with_env().context("applying BOBBIN_* overrides")
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(max_concurrent) = args.max_concurrent {
        config.max_concurrent = max_concurrent;
    }
    let orchestrator = Orchestrator::builder().config(config).build()?;
    info!(config = ?orchestrator.config(), "orchestrator ready");

    let printer = args.events.then(|| {
        let mut rx = orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(err) => warn!(%err, "failed to encode event"),
                    },
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let clients: Vec<_> = args
        .namespaces
        .iter()
        .map(|ns| orchestrator.create_client(ns.as_str(), RequestOptions::new()))
        .collect();
    anyhow::ensure!(!clients.is_empty(), "at least one namespace is required");

    // a quarter of the ids repeat, to exercise deduplication
    let distinct = (args.requests * 3 / 4).max(1);
    let mut handles = Vec::with_capacity(args.requests);
    for i in 0..args.requests {
        let client = &clients[i % clients.len()];
        let id = format!("{}/item-{}", client.namespace(), i % distinct);
        let priority = match i % 5 {
            0 => Priority::High,
            4 => Priority::Low,
            _ => Priority::Normal,
        };
        let backend = FlakyBackend {
            id: id.clone(),
            failure_rate: args.failure_rate,
            overload_rate: args.overload_rate,
            latency_ms: args.latency_ms,
        };
        match client.submit_task::<Reply, _>(id.clone(), backend, RequestOptions::new().priority(priority)) {
            Ok(handle) => handles.push(handle),
            Err(err) => warn!(%id, %err, "submission rejected"),
        }
    }

    let (mut ok, mut failed) = (0usize, 0usize);
    for handle in handles {
        let id = handle.id().to_string();
        match handle.wait().await {
            Ok(reply) => {
                ok += 1;
                info!(id = %reply.id, latency_ms = reply.latency_ms, "completed");
            }
            Err(err) => {
                failed += 1;
                warn!(%id, kind = ?err.kind(), %err, "failed");
            }
        }
    }
    info!(ok, failed, "run finished");

    println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
    if let Some(printer) = printer {
        printer.abort();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Config { config } => {
            let config = load_config(config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
