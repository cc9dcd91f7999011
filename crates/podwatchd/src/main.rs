//! podwatchd: the podwatch node agent.
//!
//! Single binary that assembles:
//! - State store (redb) holding this node's reality and health
//! - Health reconciler keeping one probe per desired service
//! - REST API for declaring services and reading health
//!
//! # Usage
//!
//! ```text
//! podwatchd run --config /etc/podwatch/podwatchd.toml --node-name node-1
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use podwatch_health::{ProbeClient, StoreHealthManager};

use crate::config::AgentConfig;

#[derive(Parser)]
#[command(name = "podwatchd", about = "podwatch node agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent until interrupted.
    Run {
        /// Path to a podwatchd.toml file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the node name.
        #[arg(long)]
        node_name: Option<String>,

        /// Override the data directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override the API port.
        #[arg(long)]
        api_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,podwatchd=debug,podwatch=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            node_name,
            data_dir,
            api_port,
        } => {
            let mut agent_config = match config {
                Some(path) => AgentConfig::from_file(&path)?,
                None => AgentConfig::default(),
            };
            if let Some(node_name) = node_name {
                agent_config.node_name = node_name;
            }
            if let Some(data_dir) = data_dir {
                agent_config.data_dir = data_dir;
            }
            if let Some(api_port) = api_port {
                agent_config.api_port = api_port;
            }
            agent_config.validate()?;
            run_agent(agent_config).await
        }
    }
}

async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    info!(node = %config.node_name, "podwatch agent starting");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let state = podwatch_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Unreadable TLS material is a setup failure, not a probe failure.
    let tls = config.tls.client_config()?;
    let client = ProbeClient::new(tls, config.watch.probe_timeout);
    let manager = StoreHealthManager::new(state.clone(), &config.node_name);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start health reconciler ────────────────────────────────

    let reconciler_handle = tokio::spawn({
        let watch_config = config.watch.clone();
        let node = config.node_name.clone();
        let store = state.clone();
        async move {
            podwatch_health::start(watch_config, &node, store, manager, client, shutdown_rx).await;
        }
    });

    // ── Start API server ───────────────────────────────────────

    let router = podwatch_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    serve_until_shutdown(addr, router, shutdown_tx, reconciler_handle).await?;

    info!("podwatch agent stopped");
    Ok(())
}

/// Serve the API, then wait for the reconciler to drain.
///
/// Workers release their publishers before the store goes away, also when
/// the API fails to bind or serve.
async fn serve_until_shutdown(
    addr: SocketAddr,
    router: axum::Router,
    shutdown_tx: watch::Sender<bool>,
    reconciler: JoinHandle<()>,
) -> anyhow::Result<()> {
    let served = serve_api(addr, router, shutdown_tx.clone()).await;
    if let Err(e) = &served {
        error!(error = %e, "API server failed, stopping health reconciler");
        let _ = shutdown_tx.send(true);
    }

    if let Err(e) = reconciler.await {
        error!(error = %e, "health reconciler task failed");
    }
    served
}

/// Serve the REST API until Ctrl-C, then flip the shutdown signal.
async fn serve_api(
    addr: SocketAddr,
    router: axum::Router,
    shutdown_tx: watch::Sender<bool>,
) -> anyhow::Result<()> {
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;
    Ok(())
}
