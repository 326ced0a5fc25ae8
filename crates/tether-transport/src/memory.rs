//! In-process transport.
//!
//! [`MemoryTransport`] connects to a [`MemoryListener`] living in the same
//! process. Each accepted [`MemoryPeer`] plays the server side of one
//! connection, which makes it the fake server for bridge tests and a
//! loopback for embedding.

use async_trait::async_trait;
use tether_protocol::Frame;
use tokio::sync::mpsc;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::traits::{CloseInfo, Connection, ConnectionId, Incoming, Transport, TransportError};

/// Create a connected transport/listener pair.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { accept_tx },
        MemoryListener { accept_rx },
    )
}

/// Client side of the in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();

        let peer = MemoryPeer {
            id: id.clone(),
            endpoint: endpoint.clone(),
            to_client,
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("listener is gone".into()))?;

        debug!(connection = %id, url = %endpoint.url, "Memory connection opened");

        Ok(Box::new(MemoryConnection {
            id,
            rx: client_rx,
            tx: client_tx,
            is_open: true,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Accepts in-process connections.
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection.
    ///
    /// Returns `None` once every transport handle is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Server side of one in-process connection.
#[derive(Debug)]
pub struct MemoryPeer {
    id: ConnectionId,
    endpoint: Endpoint,
    to_client: mpsc::UnboundedSender<Incoming>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Connection ID shared with the client side.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Endpoint the client connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Receive the next frame sent by the client.
    ///
    /// Returns `None` once the client side is dropped or closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Send a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client side is gone.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.to_client
            .send(Incoming::Frame(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Close the connection from the server side.
    pub fn close(self, info: CloseInfo) {
        let _ = self.to_client.send(Incoming::Closed(info));
    }
}

/// Client side of one in-process connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    rx: mpsc::UnboundedReceiver<Incoming>,
    tx: mpsc::UnboundedSender<Frame>,
    is_open: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let incoming = self
            .rx
            .recv()
            .await
            .unwrap_or_else(|| Incoming::Closed(CloseInfo::abnormal("peer dropped")));

        if matches!(incoming, Incoming::Closed(_)) {
            self.is_open = false;
        }
        Ok(incoming)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::SendFailed("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.rx.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut listener) = pair();
        let mut conn = transport
            .connect(&Endpoint::new("ws://memory/socket"))
            .await
            .unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.id(), conn.id());
        assert_eq!(peer.endpoint().url, "ws://memory/socket");

        conn.send(Frame::heartbeat("1")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), Frame::heartbeat("1"));

        let shout = Frame::broadcast("room:1", "shout", json!({"body": "hi"}));
        peer.send(shout.clone()).unwrap();
        assert_eq!(conn.recv().await.unwrap(), Incoming::Frame(shout));
    }

    #[tokio::test]
    async fn test_server_close_is_reported() {
        let (transport, mut listener) = pair();
        let mut conn = transport.connect(&Endpoint::default()).await.unwrap();
        let peer = listener.accept().await.unwrap();

        peer.close(CloseInfo::clean(1001, "bye"));
        assert_eq!(
            conn.recv().await.unwrap(),
            Incoming::Closed(CloseInfo::clean(1001, "bye"))
        );
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_dropped_peer_is_abnormal_close() {
        let (transport, mut listener) = pair();
        let mut conn = transport.connect(&Endpoint::default()).await.unwrap();
        drop(listener.accept().await.unwrap());

        match conn.recv().await.unwrap() {
            Incoming::Closed(info) => assert!(!info.was_clean),
            other => panic!("Expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let (transport, listener) = pair();
        drop(listener);
        assert!(matches!(
            transport.connect(&Endpoint::default()).await,
            Err(TransportError::ConnectFailed(_))
        ));
    }
}
