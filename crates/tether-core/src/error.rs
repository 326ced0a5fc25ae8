//! Bridge errors.

use thiserror::Error;

use crate::channel::JoinState;
use crate::message::ChannelHandle;

/// Errors returned by bridge operations.
///
/// None of these cross the boundary; the facade logs them and carries on.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No socket has been requested yet.
    #[error("Not connected")]
    NotConnected,

    /// The handle does not name a live channel.
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelHandle),

    /// The channel cannot move to the requested state.
    #[error("Channel {handle} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        handle: ChannelHandle,
        from: JoinState,
        to: JoinState,
    },

    /// The bridge task has stopped.
    #[error("Bridge closed")]
    Closed,

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] tether_transport::TransportError),
}
