//! Session handlers for Tether server.
//!
//! Every consumer WebSocket gets its own bridge. Text (or binary) messages
//! from the consumer are parsed as boundary commands; everything the bridge
//! emits is written back as JSON text.

use crate::config::Config;
use crate::metrics::{self, SessionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tether_core::{Bridge, BridgeHandle, Inbound};
use tether_transport::{ConnectionId, Transport, WebSocketTransport};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Transport every bridge connects upstream with.
    pub transport: Arc<dyn Transport>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            transport: Arc::new(WebSocketTransport::new(config.websocket_config())),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Tether server listening on {}", addr);
    info!("Bridge endpoint: ws://{}{}", addr, config.transport.path);

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let path = state.config.transport.path.clone();
    Router::new()
        .route(&path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Parse one consumer message into a bridge command.
fn parse_command(raw: &[u8]) -> Result<Inbound> {
    serde_json::from_slice(raw).context("Malformed boundary message")
}

/// Run one consumer session until either side goes away.
async fn handle_session(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = SessionMetricsGuard::new();
    let session = ConnectionId::generate();
    debug!(session = %session, "Consumer connected");

    let (bridge, mut outbound, task) =
        Bridge::spawn(state.config.bridge_config(), state.transport.clone());
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    debug!(session = %session, "Bridge stopped");
                    break;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(session = %session, error = %e, "Failed to encode boundary message");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                metrics::record_outbound(&message, text.len());
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !dispatch(&bridge, &session, text.as_bytes()).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if !dispatch(&bridge, &session, &data).await {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!(session = %session, "Received close frame");
                    break;
                }
                Some(Err(e)) => {
                    warn!(session = %session, error = %e, "WebSocket error");
                    metrics::record_error("websocket");
                    break;
                }
                None => {
                    debug!(session = %session, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Dropping the last handle stops the bridge and its upstream socket.
    drop(bridge);
    drop(outbound);
    if let Err(e) = task.await {
        warn!(session = %session, error = %e, "Bridge task failed");
    }
    debug!(session = %session, "Consumer disconnected");
}

/// Hand a consumer message to the bridge. Returns `false` once the bridge
/// is gone.
async fn dispatch(bridge: &BridgeHandle, session: &ConnectionId, raw: &[u8]) -> bool {
    let command = match parse_command(raw) {
        Ok(command) => command,
        Err(e) => {
            warn!(session = %session, error = %format!("{:#}", e), "Ignoring consumer message");
            metrics::record_error("parse");
            return true;
        }
    };

    metrics::record_inbound(&command, raw.len());
    bridge.send(command).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ChannelHandle, JoinSpec};

    #[test]
    fn test_parse_command() {
        let raw = br#"{"type":"joinChannels","payload":[{"topic":"room:1","presence":true}]}"#;
        match parse_command(raw).unwrap() {
            Inbound::JoinChannels(specs) => {
                assert_eq!(specs, vec![JoinSpec::new("room:1").with_presence()]);
            }
            other => panic!("Expected joinChannels, got {:?}", other),
        }

        let raw = br#"{"type":"leaveChannel","payload":4}"#;
        assert_eq!(
            parse_command(raw).unwrap(),
            Inbound::LeaveChannel(ChannelHandle(4))
        );
    }

    #[test]
    fn test_parse_command_rejects_garbage() {
        assert!(parse_command(b"not json").is_err());
        assert!(parse_command(br#"{"type":"dance","payload":null}"#).is_err());
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_router_builds_with_configured_path() {
        let state = Arc::new(AppState::new(Config::default()));
        let _app = router(state);
    }
}
