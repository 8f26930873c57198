pub mod audio;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gateway;
pub mod models;
pub mod server;
pub mod session;
pub mod transcribe;
pub mod vad;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Application-specific environment variable for log filtering (overrides config).
const LOG_ENV_VAR: &str = "LIVESCRIBE_LOG";

/// Entry point for the daemon process: configures logging and launches the daemon.
pub async fn run() -> anyhow::Result<()> {
    let (config, config_error) = match config::Config::load() {
        Ok(config) => (config, None),
        Err(e) => (config::Config::default(), Some(e)),
    };

    let log_path = livescribe_common::dirs::log_path().context("Failed to determine log path")?;
    let log_dir = log_path.parent().context("Log path has no parent")?;
    let log_filename = log_path.file_name().context("Log path has no filename")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // LIVESCRIBE_LOG env var overrides config file level
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(config.logging.level.as_directive().parse()?)
        .from_env()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter)
        .init();

    // Route whisper.cpp and GGML logs through tracing
    whisper_rs::install_logging_hooks();

    if let Some(e) = config_error {
        tracing::warn!(error = %format!("{e:#}"), "Invalid config file, using defaults");
    }

    daemon::run(config).await
}
