//! # tether-protocol
//!
//! Wire protocol definitions for the Tether channel bridge.
//!
//! This crate defines the frames exchanged with a channel server, the
//! JSON and MessagePack codecs, and protocol versioning.
//!
//! ## Frames
//!
//! Every frame is `[join_ref, ref, topic, event, payload]`:
//!
//! - `phx_join` / `phx_leave` - Channel membership requests
//! - `phx_reply` - Acknowledgement of a request, matched by `ref`
//! - `phx_error` / `phx_close` - Channel lifecycle signals from the server
//! - anything else - User events
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tether_protocol::{codec, Encoding, Frame};
//!
//! let frame = Frame::push("1", "2", "room:lobby", "new_msg", json!({"body": "hi"}));
//!
//! let encoded = codec::encode(&frame, Encoding::Json).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, Encoding, ProtocolError, WireMessage};
pub use frames::{ControlEvent, Frame, Reply, ReplyStatus};
pub use version::{Version, PROTOCOL_VERSION};
