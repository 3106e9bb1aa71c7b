//! quotawatchd: the quotawatch daemon.
//!
//! Single binary that assembles the quotawatch subsystems:
//! - Watch feed (in-memory, optionally seeded from a JSON file)
//! - Aggregation engine + feed consumers
//! - Debounced invalidation workers
//! - REST API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! quotawatchd serve --port 8080 --seed /etc/quotawatch/seed.json
//! ```
//!
//! Engine tunables come from `QUOTAWATCH_*` environment variables; log
//! filtering from `RUST_LOG`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quotawatch_engine::{Engine, EngineConfig, FeedSeed, MemoryFeed};

#[derive(Parser)]
#[command(name = "quotawatchd", about = "quotawatch daemon")]
struct Cli {
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
    /// Serve the usage views and admission check.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// JSON file with initial quotas, nodes, pods and usage readings.
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve { port, seed } => run_serve(port, seed).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quotawatchd=debug,quotawatch=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_serve(port: u16, seed: Option<PathBuf>) -> anyhow::Result<()> {
    info!("quotawatch daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let config = EngineConfig::from_env();
    info!(
        cache_ttl_ms = config.cache_ttl.as_millis() as u64,
        department_refresh_ms = config.department_refresh.as_millis() as u64,
        node_refresh_ms = config.node_refresh.as_millis() as u64,
        debounce_ms = config.quiet_period.as_millis() as u64,
        department_label = %config.department_label,
        arch_rules = ?config.classifier.rules(),
        unclassified = ?config.classifier.fallback(),
        "engine configuration loaded"
    );

    let (feed, events) = MemoryFeed::new();
    let (engine, pipelines) = Engine::new(feed.clone(), config);
    info!("aggregation engine initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let mut handles = engine.spawn_consumers(events, shutdown_rx.clone());
    handles.extend(pipelines.spawn(shutdown_rx));

    if let Some(path) = seed {
        let seed = FeedSeed::from_path(&path)?;
        feed.replay_seed(&seed).await?;
        info!(path = ?path, "feed seeded");
    }

    // ── Start API server ───────────────────────────────────────

    let router = quotawatch_api::build_router(engine);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c; shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    for handle in handles {
        let _ = handle.await;
    }

    info!("quotawatch daemon stopped");
    Ok(())
}
