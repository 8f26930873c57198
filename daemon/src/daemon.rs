//! Daemon runner that orchestrates all components.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::ModelManager;
use crate::server::{self, AppState};
use crate::transcribe::{ModelLoader, WhisperLoader};

/// Paths used by the daemon at runtime.
pub struct DaemonPaths {
    pub pid: PathBuf,
}

impl DaemonPaths {
    /// Create paths using XDG state directory defaults.
    pub fn from_xdg() -> Result<Self> {
        Ok(Self {
            pid: livescribe_common::dirs::pid_path()?,
        })
    }
}

/// Run the daemon with default paths, the Whisper loader and Ctrl+C handling.
pub async fn run(config: Config) -> Result<()> {
    let paths = DaemonPaths::from_xdg()?;
    let address = config.server.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    let loader = Arc::new(WhisperLoader::new(
        ModelManager::new()?,
        config.vad.clone(),
        config.model.threads,
        Handle::current(),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    run_with(&paths, listener, &config, loader, shutdown).await
}

/// Run the daemon on an already bound listener until `shutdown` is cancelled.
pub async fn run_with(
    paths: &DaemonPaths,
    listener: TcpListener,
    config: &Config,
    loader: Arc<dyn ModelLoader>,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Some(parent) = paths.pid.parent() {
        std::fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let pid = std::process::id();
    std::fs::write(&paths.pid, pid.to_string()).context("Failed to write PID file")?;
    info!(pid = pid, path = %paths.pid.display(), "Wrote PID file");

    let state = Arc::new(AppState::new(loader, config, shutdown));
    info!(
        language = %config.model.language,
        model = %config.model.size,
        vad = config.vad.enabled,
        "Daemon started"
    );
    let result = server::serve(listener, state).await;

    let _ = std::fs::remove_file(&paths.pid);
    info!("Daemon stopped");
    result
}

/// Cancel `shutdown` on Ctrl+C, or SIGTERM on Unix.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
        }
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
