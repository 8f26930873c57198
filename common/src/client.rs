//! WebSocket client for talking to the livescribe daemon.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::protocol::{ClientMessage, ConnectParams, ServerMessage};

/// Default daemon address.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/";

/// Build the connection URL for `base` with the given addressing parameters.
pub fn endpoint_url(base: &str, params: &ConnectParams) -> String {
    let query = params.to_query();
    if query.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

/// An open connection to the daemon.
pub struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Connect to the daemon at `base` with the given addressing parameters.
pub async fn connect(base: &str, params: &ConnectParams) -> Result<Client> {
    let url = endpoint_url(base, params);
    debug!(url = %url, "Connecting to daemon");
    let (stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to daemon at {url}"))?;
    Ok(Client { stream })
}

impl Client {
    /// Send one message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = message.encode().context("Failed to encode message")?;
        self.stream
            .send(Message::Text(json))
            .await
            .context("Failed to send message")
    }

    /// Receive the next daemon message, skipping control frames.
    ///
    /// Fails if the connection closes before a message arrives.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        while let Some(frame) = self.stream.next().await {
            match frame.context("Connection error")? {
                Message::Text(text) => {
                    trace!(payload = %text, "Received frame");
                    return ServerMessage::decode(&text).context("Malformed daemon message");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        bail!("Connection closed by daemon")
    }

    /// Receive the next daemon message, or `None` if nothing arrives within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ServerMessage>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .context("Failed to close connection")
    }
}
