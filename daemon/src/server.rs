//! HTTP and WebSocket server.
//!
//! One WebSocket connection maps to one [`SessionGateway`]. The upgrade is
//! served on `/` and `/ws`; the connection's query string carries its
//! addressing parameters.

use anyhow::{Context, Result};
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use livescribe_common::protocol::{ConnectParams, ServerMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{Config, ModelConfig, SessionConfig};
use crate::gateway::SessionGateway;
use crate::transcribe::ModelLoader;

/// How long shutdown waits for open connections to tear down their sessions.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared by every connection.
pub struct AppState {
    loader: Arc<dyn ModelLoader>,
    model: ModelConfig,
    session: SessionConfig,
    keepalive: Option<Duration>,
    connections: AtomicUsize,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl AppState {
    pub fn new(loader: Arc<dyn ModelLoader>, config: &Config, shutdown: CancellationToken) -> Self {
        let keepalive =
            (config.server.keepalive_secs > 0).then(|| Duration::from_secs(config.server.keepalive_secs));
        Self {
            loader,
            model: config.model.clone(),
            session: config.session.clone(),
            keepalive,
            connections: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Number of open WebSocket connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: usize,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until the shutdown token is cancelled, then wait for open
/// connections to close.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let tracker = state.tracker.clone();
    info!(
        address = %listener.local_addr().context("Listener has no local address")?,
        "Listening for connections"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("Server error")?;

    tracker.close();
    if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
        warn!("Timed out waiting for connections to close");
    }
    info!("Server stopped");
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        connections: state.connections(),
    })
}

/// WebSocket upgrade handler
///
/// Always upgrades; a malformed query string is reported over the socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    params: Result<Query<ConnectParams>, QueryRejection>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let params = params
        .map(|Query(params)| params)
        .map_err(|rejection| format!("Invalid connection parameters: {}", rejection.body_text()));
    let tracker = state.tracker.clone();
    ws.on_upgrade(move |socket| tracker.track_future(handle_socket(socket, params, state)))
}

type Outbound = SplitSink<WebSocket, Message>;

async fn send_message(sender: &mut Outbound, message: &ServerMessage) -> Result<()> {
    let json = message.encode().context("Failed to encode message")?;
    sender
        .send(Message::Text(json))
        .await
        .context("Failed to send message")
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    params: std::result::Result<ConnectParams, String>,
    state: Arc<AppState>,
) {
    let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let count = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    info!(connection = id, connections = count, "Client connected");

    let (mut sender, receiver) = socket.split();
    let mut gateway = SessionGateway::new(
        id,
        Arc::clone(&state.loader),
        state.model.clone(),
        state.session.clone(),
    );

    let initialized = match params {
        Ok(params) => {
            debug!(
                connection = id,
                language = ?params.language,
                model = ?params.model,
                task = ?params.task,
                "Initializing session"
            );
            gateway.initialize(&params).await.map_err(|e| e.to_string())
        }
        Err(message) => Err(message),
    };

    match initialized {
        Ok(reply) => {
            if send_message(&mut sender, &reply).await.is_ok() {
                run_connection(&mut gateway, &mut sender, receiver, &state).await;
            }
        }
        Err(message) => {
            warn!(connection = id, error = %message, "Session initialization failed");
            let _ = send_message(&mut sender, &ServerMessage::error(message)).await;
            let _ = sender.close().await;
        }
    }

    gateway.close().await;
    let count = state.connections.fetch_sub(1, Ordering::SeqCst) - 1;
    info!(connection = id, connections = count, "Client disconnected");
}

/// Message loop for an initialized connection.
async fn run_connection(
    gateway: &mut SessionGateway,
    sender: &mut Outbound,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    state: &AppState,
) {
    let period = state.keepalive.unwrap_or(Duration::from_secs(3600));
    let mut keepalive = interval_at(tokio::time::Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!(connection = gateway.id(), "Closing connection for shutdown");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            _ = keepalive.tick(), if state.keepalive.is_some() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            frame = receiver.next() => {
                let reply = match frame {
                    Some(Ok(Message::Text(text))) => gateway.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => Some(gateway.handle_binary()),
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pongs are answered by the protocol layer
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        debug!(connection = gateway.id(), error = %e, "Connection error");
                        break;
                    }
                };

                if let Some(reply) = reply {
                    if let Err(e) = send_message(sender, &reply).await {
                        debug!(connection = gateway.id(), error = %e, "Client went away");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
