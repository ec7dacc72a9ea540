//! Wires the Message Hub to a bound TCP listener and runs the log-retention
//! background loop for the lifetime of the process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use nightfall_bridge::hub::Hub;
use nightfall_core::config::Config;
use nightfall_harness::provider::{CompletionProvider, StubProvider};
use nightfall_harness::shutdown::ShutdownSignal;
use nightfall_harness::tools::ToolRegistry;

/// How often the log-retention pass runs. Short enough that a long-lived
/// daemon never accumulates unbounded logs, long enough not to matter for
/// the handful of task runs a local daemon produces per hour.
const LOG_RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Owns the Message Hub and the daemon-lifetime background tasks.
pub struct Daemon {
    project_root: PathBuf,
    log_retention: usize,
    hub: Hub,
    shutdown: ShutdownSignal,
}

impl Daemon {
    pub fn new(project_root: impl Into<PathBuf>, config: Config) -> Self {
        let project_root = project_root.into();
        let provider: Arc<dyn CompletionProvider> =
            Arc::new(StubProvider::new(config.provider.name.clone()));
        let tools = Arc::new(ToolRegistry::new());
        let log_retention = config.logs.retention;
        let hub = Hub::new(project_root.clone(), provider, tools, config);
        Self {
            project_root,
            log_retention,
            hub,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Returns a handle other tasks (e.g. the signal handler in `main`) can
    /// use to trigger shutdown.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Binds `addr`, serves the Message Hub's `/ws` route, and runs the log
    /// retention loop until shutdown fires. Returns the bound port.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        println!("{}", serde_json::json!({"type": "ready", "port": port}));

        self.spawn_log_retention();

        let router = self.hub.router();
        let mut shutdown_rx = self.shutdown.subscribe();
        info!(port, "message hub listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("message hub shutting down");
            })
            .await
            .context("message hub server error")?;

        Ok(())
    }

    fn spawn_log_retention(&self) {
        let project_root = self.project_root.clone();
        let retention = self.log_retention;
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LOG_RETENTION_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match nightfall_agents::task_log::prune_old_logs(&project_root, retention) {
                            Ok(removed) if removed > 0 => info!(removed, "pruned old task logs"),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "log retention pass failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("log retention loop stopping");
                        break;
                    }
                }
            }
        });
    }
}
