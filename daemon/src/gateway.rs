//! Per-connection protocol state machine.
//!
//! Translates inbound client messages into [`StreamingSession`] calls and
//! session results into outbound messages. Transport agnostic: the server
//! feeds it decoded frames and writes back whatever it returns.

use livescribe_common::protocol::{ClientMessage, ConnectParams, DecodeError, ServerMessage};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ModelConfig, SessionConfig};
use crate::error::LoadError;
use crate::session::StreamingSession;
use crate::transcribe::{AUTO_LANGUAGE, ModelLoader, ModelRequest};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Model not loaded yet.
    Connecting,
    /// Model loaded and `initialized` sent; no message handled yet.
    Initialized,
    Streaming,
    /// `stop` handled; audio is rejected until `reset`.
    Stopped,
}

/// Owns the session of one connection.
pub struct SessionGateway {
    id: u64,
    loader: Arc<dyn ModelLoader>,
    defaults: ModelConfig,
    session_config: SessionConfig,
    state: GatewayState,
    session: Option<StreamingSession>,
}

impl SessionGateway {
    pub fn new(
        id: u64,
        loader: Arc<dyn ModelLoader>,
        defaults: ModelConfig,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            id,
            loader,
            defaults,
            session_config,
            state: GatewayState::Connecting,
            session: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn session(&self) -> Option<&StreamingSession> {
        self.session.as_ref()
    }

    /// Resolve the connection parameters, load a model and start the session.
    ///
    /// On error the caller reports it and closes the connection; no session
    /// exists in that case.
    pub async fn initialize(&mut self, params: &ConnectParams) -> Result<ServerMessage, LoadError> {
        let request = ModelRequest::resolve(params, &self.defaults)?;
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| AUTO_LANGUAGE.to_string());
        debug!(
            connection = self.id,
            size = %request.size,
            language = %language,
            "Loading model for connection"
        );

        let loader = Arc::clone(&self.loader);
        let load_request = request.clone();
        let model = tokio::task::spawn_blocking(move || loader.load(&load_request))
            .await
            .map_err(|e| LoadError::Unavailable(format!("Model loading task failed: {e}")))??;

        let session = StreamingSession::with_model(self.id, self.session_config.clone(), model)
            .map_err(LoadError::unavailable)?;
        self.session = Some(session);
        self.state = GatewayState::Initialized;

        info!(connection = self.id, size = %request.size, language = %language, "Session initialized");
        Ok(ServerMessage::Initialized {
            message: format!(
                "Model '{}' loaded, language '{}', task '{}'",
                request.size,
                language,
                request.task.as_str()
            ),
        })
    }

    /// Handle one inbound text frame, returning the reply if there is one.
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerMessage> {
        let Some(session) = self.session.as_mut() else {
            return Some(ServerMessage::error("Session is not initialized"));
        };

        let message = match ClientMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = self.id, error = %e, "Rejected inbound message");
                return Some(ServerMessage::error(e.to_string()));
            }
        };
        if self.state == GatewayState::Initialized {
            self.state = GatewayState::Streaming;
        }

        match message {
            ClientMessage::Audio { audio } => {
                if let Err(e) = session.submit_chunk(audio) {
                    debug!(connection = self.id, error = %e, "Audio rejected");
                    return Some(ServerMessage::error(e.to_string()));
                }
                // Polled right after submission; results computed later surface
                // with the next audio message
                let text = session.poll_partial();
                (!text.is_empty()).then_some(ServerMessage::Transcription { text })
            }
            ClientMessage::Stop => {
                let text = session.finish().await;
                self.state = GatewayState::Stopped;
                info!(connection = self.id, dropped = session.dropped_chunks(), "Stream stopped");
                Some(ServerMessage::FinalTranscription { text })
            }
            ClientMessage::Reset => {
                session.reset();
                self.state = GatewayState::Streaming;
                Some(ServerMessage::Reset {
                    message: "Session reset".to_string(),
                })
            }
        }
    }

    /// Binary frames are not part of the protocol.
    pub fn handle_binary(&self) -> ServerMessage {
        debug!(connection = self.id, "Rejected binary frame");
        ServerMessage::error(DecodeError::BinaryFrame.to_string())
    }

    /// Tear down the session, joining its worker off the async runtime.
    pub async fn close(mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || drop(session)).await {
            warn!(connection = self.id, error = %e, "Session teardown failed");
        }
        debug!(connection = self.id, "Session closed");
    }
}

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;
