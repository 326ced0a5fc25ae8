//! # tether-transport
//!
//! Client transport layer for the Tether channel bridge.
//!
//! This crate opens and drives the single socket a bridge talks through:
//!
//! - **WebSocket** - The real thing, via tokio-tungstenite
//! - **Memory** - An in-process pair, used as the fake server in tests
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` and `Connection` traits. The
//! [`Link`] driver sits on top of them and turns a connection into a stream
//! of [`LinkEvent`]s, taking care of heartbeats along the way.
//!
//! ```rust,ignore
//! use tether_transport::{Endpoint, Link, LinkEvent, LinkOptions};
//!
//! let (link, mut events) = Link::open(transport, Endpoint::new(url), LinkOptions::default());
//! while let Some(event) = events.recv().await {
//!     // Opened, Frame(..), Closed(..)
//! }
//! ```

pub mod endpoint;
pub mod link;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use endpoint::Endpoint;
pub use link::{Link, LinkEvent, LinkOptions};
pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use traits::{CloseInfo, Connection, ConnectionId, Incoming, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
