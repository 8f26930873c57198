//! Wire protocol between livescribe clients and the daemon.
//!
//! Every frame is a JSON text frame carrying an object with a `type` tag.
//! Audio is 16 kHz mono 16-bit PCM, sent as an array of integers; callers
//! resample before sending.

use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use thiserror::Error;

/// Sample rate of all audio on the wire, in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Language used when the connection does not name one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Model size used when the connection does not name one.
pub const DEFAULT_MODEL: &str = "base";

/// Message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A chunk of 16-bit PCM samples.
    Audio { audio: Vec<i16> },
    /// Finalize the session and request the final transcription.
    Stop,
    /// Clear the session and start again from offset zero.
    Reset,
}

/// Message sent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Initialized { message: String },
    Error { message: String },
    Transcription { text: String },
    FinalTranscription { text: String },
    Reset { message: String },
}

/// Failure to decode an inbound frame. Never fatal for the connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON format: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(serde_json::Error),

    #[error("Binary frames are not supported, send JSON text frames")]
    BinaryFrame,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Syntax | Category::Eof | Category::Io => DecodeError::InvalidJson(err),
            Category::Data => DecodeError::InvalidMessage(err),
        }
    }
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// The `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Initialized { .. } => "initialized",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Transcription { .. } => "transcription",
            ServerMessage::FinalTranscription { .. } => "final_transcription",
            ServerMessage::Reset { .. } => "reset",
        }
    }
}

/// Connection addressing parameters, resolved once when a connection opens.
///
/// Carried as the query string of the WebSocket URL:
/// `ws://host:port/?language=en&model=base&task=transcribe`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub language: Option<String>,
    pub model: Option<String>,
    /// `transcribe` or `translate`.
    pub task: Option<String>,
}

impl ConnectParams {
    /// Render as a URL query string (without the leading `?`).
    pub fn to_query(&self) -> String {
        let pairs = [
            ("language", &self.language),
            ("model", &self.model),
            ("task", &self.task),
        ];
        pairs
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
