//! Configuration management for the livescribe daemon.
//!
//! Handles loading, saving, and providing defaults for the daemon configuration.

use anyhow::{Context, Result};
use livescribe_common::protocol::{DEFAULT_LANGUAGE, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub vad: VadSettings,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Listening address and connection housekeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Interval between WebSocket pings, in seconds. 0 disables keepalive.
    pub keepalive_secs: u64,
}

/// Defaults for the speech recognition model. Connections may override
/// language, size and task through their addressing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Language code, or "auto" for detection.
    pub language: String,
    /// Model size, e.g. "base" or "small.en".
    pub size: String,
    pub task: Task,
    /// Inference threads per session. 0 picks a value from the CPU count.
    pub threads: u16,
}

/// Whether speech is transcribed in its own language or translated to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Transcribe,
    Translate,
}

impl Task {
    /// Parse a task name as given on a connection.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "transcribe" => Some(Task::Transcribe),
            "translate" => Some(Task::Translate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Transcribe => "transcribe",
            Task::Translate => "translate",
        }
    }
}

/// Voice-activity filtering applied before transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub enabled: bool,
    /// Probability at or above which a frame counts as speech.
    pub threshold: f32,
    /// Silence shorter than this does not split a speech region.
    pub min_silence_ms: u32,
    /// Padding added on both sides of each speech region.
    pub speech_pad_ms: u32,
}

/// Per-session buffering and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on the wait in `finish` for in-flight work.
    pub finish_grace_ms: u64,
    /// How long the worker blocks on an empty queue before checking for shutdown.
    pub worker_poll_ms: u64,
    /// Maximum number of chunks waiting for transcription.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

/// What to drop when the audio queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: LogLevel,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a tracing filter directive string for the daemon crate.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "livescribe_daemon=error",
            LogLevel::Warn => "livescribe_daemon=warn",
            LogLevel::Info => "livescribe_daemon=info",
            LogLevel::Debug => "livescribe_daemon=debug",
            LogLevel::Trace => "livescribe_daemon=trace",
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            keepalive_secs: 20,
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            size: DEFAULT_MODEL.to_string(),
            task: Task::default(),
            threads: 0,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            min_silence_ms: 500,
            speech_pad_ms: 200,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            finish_grace_ms: 500,
            worker_poll_ms: 100,
            queue_capacity: 256,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn finish_grace(&self) -> Duration {
        Duration::from_millis(self.finish_grace_ms)
    }

    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms.max(1))
    }
}

impl Config {
    /// Returns the default config file path.
    /// `~/.config/livescribe/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        livescribe_common::dirs::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load configuration from the default path.
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file as TOML")
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
