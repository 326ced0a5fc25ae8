//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tether_protocol::{codec::FrameCodec, Encoding, Frame, WireMessage, PROTOCOL_VERSION};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig as WsConfig},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::traits::{
    CloseInfo, Connection, ConnectionId, Incoming, Transport, TransportError, CLOSE_NO_STATUS,
};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Frame serializer.
    pub encoding: Encoding,
    /// How long the TCP + WebSocket handshake may take.
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024, // 1 MB
            encoding: Encoding::Json,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let url = endpoint.to_url(PROTOCOL_VERSION)?;
        debug!(url = %url, "Opening WebSocket");

        let ws_config = WsConfig {
            max_message_size: Some(self.config.max_message_size),
            ..Default::default()
        };

        let (stream, _response) = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async_with_config(url.as_str(), Some(ws_config), false),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let conn = WebSocketConnection::new(stream, self.config.encoding);
        info!(connection = %conn.id, host = ?url.host_str(), "WebSocket connected");
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    codec: FrameCodec,
    is_open: bool,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, encoding: Encoding) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            codec: FrameCodec::new(encoding),
            is_open: true,
        }
    }
}

fn close_info(frame: Option<CloseFrame<'_>>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo::clean(u16::from(frame.code), frame.reason.to_string()),
        None => CloseInfo::clean(CLOSE_NO_STATUS, ""),
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => WireMessage::Text(text),
                Some(Ok(Message::Binary(data))) => WireMessage::Binary(data.into()),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by tungstenite and flushed on the next write
                    continue;
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open = false;
                    return Ok(Incoming::Closed(close_info(frame)));
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    self.is_open = false;
                    return Ok(Incoming::Closed(close_info(None)));
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    self.is_open = false;
                    return Ok(Incoming::Closed(CloseInfo::abnormal(e.to_string())));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(Incoming::Closed(CloseInfo::abnormal("stream ended")));
                }
            };

            return Ok(Incoming::Frame(self.codec.decode(&message)?));
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match self.codec.encode(&frame)? {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(data) => Message::Binary(data.to_vec()),
        };

        self.stream
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.encoding, Encoding::Json);
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_close_info_from_frame() {
        let info = close_info(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "going away".into(),
        }));
        assert_eq!(info, CloseInfo::clean(1001, "going away"));
        assert_eq!(close_info(None).code, CLOSE_NO_STATUS);
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        let transport = WebSocketTransport::new(WebSocketConfig {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        let result = transport
            .connect(&Endpoint::new("ws://127.0.0.1:1/socket"))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectFailed(_)) | Err(TransportError::Timeout)
        ));
    }
}
