//! Transport abstraction traits for Tether.
//!
//! These traits define the interface that every client transport must
//! provide, allowing the bridge to stay transport-agnostic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_protocol::Frame;
use thiserror::Error;

use crate::endpoint::Endpoint;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the peer closed without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code for a connection lost without a closing handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a connection ended, exactly as the transport observed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseInfo {
    /// Whether the closing handshake completed.
    pub was_clean: bool,
    /// Close reason text.
    pub reason: String,
    /// Close status code.
    pub code: u16,
}

impl CloseInfo {
    /// A clean close with the given code and reason.
    #[must_use]
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            was_clean: true,
            reason: reason.into(),
            code,
        }
    }

    /// A connection lost without a closing handshake.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            was_clean: false,
            reason: reason.into(),
            code: CLOSE_ABNORMAL,
        }
    }
}

/// Something received from a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A decoded frame.
    Frame(Frame),
    /// The connection is closed; no further frames follow.
    Closed(CloseInfo),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connecting did not finish in time.
    #[error("Connection timed out")]
    Timeout,

    /// The endpoint could not be turned into a socket URL.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Failed to establish the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the connection can keep going after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// A transport that can open client connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to the endpoint.
    ///
    /// Resolves once the connection is open or has failed.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An open client connection.
///
/// `recv` must be cancel-safe: the link driver polls it inside `select!`.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next frame, or the close that ended the connection.
    async fn recv(&mut self) -> Result<Incoming, TransportError>;

    /// Send a frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_close_info_serializes_camel_case() {
        let info = CloseInfo::abnormal("boom");
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"wasClean": false, "reason": "boom", "code": 1006})
        );
    }

    #[test]
    fn test_only_protocol_errors_are_recoverable() {
        let decode = tether_protocol::codec::decode_text("nope").unwrap_err();
        assert!(TransportError::Protocol(decode).is_recoverable());
        assert!(!TransportError::ConnectionClosed.is_recoverable());
    }
}
