//! Error types the gateway branches on.
//!
//! Plumbing elsewhere in the daemon uses `anyhow`.

use thiserror::Error;

/// The requested model, language or task cannot be resolved. Fatal for
/// session creation.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unknown model size '{0}'")]
    UnknownModelSize(String),

    #[error("Unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("Unknown task '{0}', expected 'transcribe' or 'translate'")]
    UnknownTask(String),

    #[error("Failed to load model: {0}")]
    Unavailable(String),
}

impl LoadError {
    /// Wrap a backend failure, keeping the full context chain in the message.
    pub fn unavailable(err: anyhow::Error) -> Self {
        LoadError::Unavailable(format!("{err:#}"))
    }
}

/// Audio rejected by a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session has no model loaded")]
    NotStarted,

    #[error("Session is finished, send reset to start a new stream")]
    Finished,

    #[error("Transcription worker has stopped")]
    WorkerStopped,
}
