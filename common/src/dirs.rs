//! XDG directory utilities for livescribe.

use std::path::PathBuf;

use anyhow::{Context, Result};
use xdg::BaseDirectories;

const APP_NAME: &str = "livescribe";

fn base_dirs() -> BaseDirectories {
    BaseDirectories::with_prefix(APP_NAME)
}

/// Return the XDG state directory, creating it if needed.
/// `~/.local/state/livescribe/`
pub fn state_dir() -> Result<PathBuf> {
    let dir = base_dirs()
        .get_state_home()
        .context("Failed to get XDG state directory (HOME not set?)")?;
    std::fs::create_dir_all(&dir).context("Failed to create state directory")?;
    Ok(dir)
}

/// Return the XDG config directory (no creation - config may not exist yet).
/// `~/.config/livescribe/`
pub fn config_dir() -> Result<PathBuf> {
    base_dirs()
        .get_config_home()
        .context("Could not determine config directory (HOME not set?)")
}

/// Return the XDG data directory, creating it if needed.
/// `~/.local/share/livescribe/`
pub fn data_dir() -> Result<PathBuf> {
    let dir = base_dirs()
        .get_data_home()
        .context("Could not determine data directory (HOME not set?)")?;
    std::fs::create_dir_all(&dir).context("Failed to create data directory")?;
    Ok(dir)
}

/// Directory holding downloaded model files.
/// `~/.local/share/livescribe/models/`
pub fn models_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("models"))
}

/// Daemon PID file path.
/// `~/.local/state/livescribe/daemon.pid`
pub fn pid_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("daemon.pid"))
}

/// Daemon log file path.
/// `~/.local/state/livescribe/daemon.log`
pub fn log_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("daemon.log"))
}
