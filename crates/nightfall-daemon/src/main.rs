//! Nightfall daemon — wires the orchestration core to a local WebSocket
//! endpoint and serves it until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use nightfall_core::config::Config;
use nightfall_daemon::daemon::Daemon;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "nightfall-daemon")]
struct Cli {
    /// Port to bind the local WebSocket endpoint to.
    #[arg(long)]
    port: u16,

    /// Project root the daemon operates on (source of `.nightfall/config.yaml`,
    /// snapshots, and task logs).
    #[arg(long = "project-root")]
    project_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    nightfall_telemetry::logging::init_logging("nightfall-daemon", "info");

    let config = Config::load(&cli.project_root)
        .with_context(|| format!("failed to load config from {}", cli.project_root.display()))?;

    info!(project_root = %cli.project_root.display(), "nightfall daemon starting");

    let daemon = Daemon::new(cli.project_root, config);
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        wait_for_termination().await;
        info!("termination signal received, initiating shutdown");
        shutdown.trigger();
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    daemon.run(addr).await
}

/// Resolves on SIGINT or SIGTERM (Unix) / ctrl-c (other platforms).
#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
