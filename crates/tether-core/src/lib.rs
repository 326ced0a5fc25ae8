//! # tether-core
//!
//! The channel bridge: one socket, many channels, and a consumer that only
//! ever sees discrete messages.
//!
//! This crate provides the building blocks:
//!
//! - **Message** - Boundary messages in and out of the bridge
//! - **Push** - Correlates each join, leave and push with its one outcome
//! - **Filter** - Keeps protocol control traffic away from the consumer
//! - **Presence** - Folds presence state and diffs into join/leave/sync events
//! - **Channel** / **Lifecycle** - Channel arena and join state machine
//! - **Bridge** - The actor tying it all to a transport
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ Inbound  ┌──────────┐  frames  ┌──────────────┐
//! │ Consumer │─────────▶│  Bridge  │◀────────▶│ Link (socket)│
//! └──────────┘◀─────────└──────────┘          └──────────────┘
//!              Outbound       │
//!                             ▼
//!              ┌─────────────────────────────┐
//!              │ Controller: channels, push  │
//!              │ router, filter, presence    │
//!              └─────────────────────────────┘
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod message;
pub mod presence;
pub mod push;
pub mod socket;

pub use bridge::{Bridge, BridgeHandle};
pub use channel::{Channel, ChannelRegistry, JoinState};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use filter::{classify, FrameClass};
pub use lifecycle::ChannelController;
pub use message::{
    AckHandlers, AckKind, ChannelHandle, ChannelMessage, ConnectRequest, Inbound, JoinSpec,
    Outbound, PresenceEvent, PresenceUpdate, PushKind, PushReply, PushRequest,
};
pub use presence::{PresenceDiff, PresenceSet, PresenceTracker};
pub use push::{PendingPush, PushOutcome, PushRouter, Settled};
pub use socket::{SocketManager, SocketState};
