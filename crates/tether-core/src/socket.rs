//! Connection manager.
//!
//! Owns the bridge's single socket. A new connect replaces the previous
//! link outright; the old driver stops and its close is never seen.

use std::future::pending;
use std::sync::Arc;

use tether_protocol::Frame;
use tether_transport::{CloseInfo, Endpoint, Link, LinkEvent, LinkOptions, Transport};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::BridgeError;

/// Lifecycle of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unconnected,
    Connecting,
    Open,
    Closed,
}

/// Owner of the transport link.
pub struct SocketManager {
    transport: Arc<dyn Transport>,
    options: LinkOptions,
    link: Option<Link>,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    state: SocketState,
    next_ref: u64,
}

impl SocketManager {
    /// Create a manager that connects through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: LinkOptions) -> Self {
        Self {
            transport,
            options,
            link: None,
            events: None,
            state: SocketState::Unconnected,
            next_ref: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> SocketState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    /// Whether a link is connecting or open.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.state, SocketState::Connecting | SocketState::Open)
    }

    /// Start connecting. Returns `true` if a live link was replaced.
    pub fn connect(&mut self, endpoint: Endpoint) -> bool {
        let replaced = self.is_live();
        if replaced {
            info!(url = %endpoint.url, "Replacing existing connection");
        } else {
            info!(url = %endpoint.url, transport = self.transport.name(), "Connecting");
        }

        let (link, events) = Link::open(self.transport.clone(), endpoint, self.options.clone());
        self.link = Some(link);
        self.events = Some(events);
        self.state = SocketState::Connecting;
        replaced
    }

    /// Fold a link event into the socket state.
    pub fn observe(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Opened => self.state = SocketState::Open,
            LinkEvent::Closed(_) => {
                self.state = SocketState::Closed;
                self.link = None;
                self.events = None;
            }
            LinkEvent::Frame(_) => {}
        }
    }

    /// Next event from the current link. Never resolves without one.
    pub async fn next_event(&mut self) -> LinkEvent {
        let Some(events) = self.events.as_mut() else {
            return pending().await;
        };
        match events.recv().await {
            Some(event) => event,
            None => {
                warn!("Link driver stopped without a close");
                LinkEvent::Closed(CloseInfo::abnormal("link driver stopped"))
            }
        }
    }

    /// Allocate the next wire reference.
    ///
    /// References keep counting across reconnects so replies meant for an
    /// old connection can never match a new push.
    pub fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    /// Queue a frame on the current link.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotConnected`] without a live link, or a
    /// transport error if its driver is gone.
    pub fn send(&self, frame: Frame) -> Result<(), BridgeError> {
        let link = self.link.as_ref().ok_or(BridgeError::NotConnected)?;
        debug!(topic = %frame.topic, event = %frame.event, "Frame queued");
        link.send(frame)?;
        Ok(())
    }
}
