//! Frame types for the channel protocol.
//!
//! Frames are the fundamental unit of communication on a channel socket.
//! On the wire a frame is the five element array
//! `[join_ref, ref, topic, event, payload]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic reserved for socket-level traffic such as heartbeats.
pub const SOCKET_TOPIC: &str = "phoenix";

/// Event name of a socket heartbeat.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Prefix of the per-push reply correlation event names.
pub const REPLY_EVENT_PREFIX: &str = "chan_reply_";

/// Marker prefixed to every internal control event on the wire.
pub const CONTROL_PREFIX: &str = "phx_";

/// Event name of a full presence snapshot.
pub const PRESENCE_STATE_EVENT: &str = "presence_state";

/// Event name of an incremental presence change.
pub const PRESENCE_DIFF_EVENT: &str = "presence_diff";

/// Internal control events of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlEvent {
    Close,
    Error,
    Join,
    Reply,
    Leave,
}

impl ControlEvent {
    /// All control events.
    pub const ALL: [ControlEvent; 5] = [
        ControlEvent::Close,
        ControlEvent::Error,
        ControlEvent::Join,
        ControlEvent::Reply,
        ControlEvent::Leave,
    ];

    /// The event name as sent on the wire (`phx_join`, ...).
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            ControlEvent::Close => "phx_close",
            ControlEvent::Error => "phx_error",
            ControlEvent::Join => "phx_join",
            ControlEvent::Reply => "phx_reply",
            ControlEvent::Leave => "phx_leave",
        }
    }

    /// The bare control name without the wire marker (`join`, ...).
    #[must_use]
    pub fn bare_name(self) -> &'static str {
        match self {
            ControlEvent::Close => "close",
            ControlEvent::Error => "error",
            ControlEvent::Join => "join",
            ControlEvent::Reply => "reply",
            ControlEvent::Leave => "leave",
        }
    }

    /// Match an event name against both the prefixed and the bare spelling.
    #[must_use]
    pub fn from_event(event: &str) -> Option<Self> {
        let bare = event.strip_prefix(CONTROL_PREFIX).unwrap_or(event);
        Self::ALL.into_iter().find(|c| c.bare_name() == bare)
    }
}

impl TryFrom<&str> for ControlEvent {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, <Self as TryFrom<&str>>::Error> {
        Self::from_event(value).ok_or("Not a control event")
    }
}

/// Build the reply correlation event name for a push reference.
#[must_use]
pub fn reply_event_name(push_ref: &str) -> String {
    format!("{REPLY_EVENT_PREFIX}{push_ref}")
}

/// Parse a reply correlation event name back into its reference digits.
///
/// The reference is kept as text; it may be wider than any integer type.
#[must_use]
pub fn parse_reply_event(event: &str) -> Option<&str> {
    let digits = event.strip_prefix(REPLY_EVENT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits)
}

/// Status carried by a `phx_reply` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error,
    /// Any status the bridge does not interpret.
    Other(String),
}

impl From<&str> for ReplyStatus {
    fn from(value: &str) -> Self {
        match value {
            "ok" => ReplyStatus::Ok,
            "error" => ReplyStatus::Error,
            other => ReplyStatus::Other(other.to_string()),
        }
    }
}

/// Payload of a `phx_reply` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Reply status (`ok`, `error`, ...).
    pub status: String,
    /// Server supplied response body.
    #[serde(default)]
    pub response: Value,
}

impl Reply {
    /// Interpret the status string.
    #[must_use]
    pub fn status(&self) -> ReplyStatus {
        ReplyStatus::from(self.status.as_str())
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawFrame", from = "RawFrame")]
pub struct Frame {
    /// Reference of the join that owns this frame's channel lifecycle.
    pub join_ref: Option<String>,
    /// Push reference, present on requests and on their replies.
    pub msg_ref: Option<String>,
    /// Channel topic.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Value,
}

/// Array representation used by the v2 serializer.
#[derive(Serialize, Deserialize)]
struct RawFrame(Option<String>, Option<String>, String, String, Value);

impl From<Frame> for RawFrame {
    fn from(frame: Frame) -> Self {
        RawFrame(
            frame.join_ref,
            frame.msg_ref,
            frame.topic,
            frame.event,
            frame.payload,
        )
    }
}

impl From<RawFrame> for Frame {
    fn from(raw: RawFrame) -> Self {
        let RawFrame(join_ref, msg_ref, topic, event, payload) = raw;
        Frame {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        }
    }
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub fn new(
        join_ref: Option<String>,
        msg_ref: Option<String>,
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: Value,
    ) -> Self {
        Frame {
            join_ref,
            msg_ref,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    /// Create a join request. The push reference doubles as the join reference.
    #[must_use]
    pub fn join(join_ref: impl Into<String>, topic: impl Into<String>, payload: Value) -> Self {
        let join_ref = join_ref.into();
        Frame::new(
            Some(join_ref.clone()),
            Some(join_ref),
            topic,
            ControlEvent::Join.wire_name(),
            payload,
        )
    }

    /// Create a leave request.
    #[must_use]
    pub fn leave(
        join_ref: impl Into<String>,
        msg_ref: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Frame::new(
            Some(join_ref.into()),
            Some(msg_ref.into()),
            topic,
            ControlEvent::Leave.wire_name(),
            Value::Object(serde_json::Map::new()),
        )
    }

    /// Create a user push.
    #[must_use]
    pub fn push(
        join_ref: impl Into<String>,
        msg_ref: impl Into<String>,
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: Value,
    ) -> Self {
        Frame::new(
            Some(join_ref.into()),
            Some(msg_ref.into()),
            topic,
            event,
            payload,
        )
    }

    /// Create a socket heartbeat.
    #[must_use]
    pub fn heartbeat(msg_ref: impl Into<String>) -> Self {
        Frame::new(
            None,
            Some(msg_ref.into()),
            SOCKET_TOPIC,
            HEARTBEAT_EVENT,
            Value::Object(serde_json::Map::new()),
        )
    }

    /// Create a reply frame, as a server would send it.
    #[must_use]
    pub fn reply(
        join_ref: Option<String>,
        msg_ref: impl Into<String>,
        topic: impl Into<String>,
        status: &str,
        response: Value,
    ) -> Self {
        Frame::new(
            join_ref,
            Some(msg_ref.into()),
            topic,
            ControlEvent::Reply.wire_name(),
            serde_json::json!({ "status": status, "response": response }),
        )
    }

    /// Create a server broadcast (no references).
    #[must_use]
    pub fn broadcast(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Frame::new(None, None, topic, event, payload)
    }

    /// Whether this is a `phx_reply` frame.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.event == ControlEvent::Reply.wire_name()
    }

    /// Whether this frame targets the socket itself rather than a channel.
    #[must_use]
    pub fn is_socket_frame(&self) -> bool {
        self.topic == SOCKET_TOPIC
    }

    /// Parse the payload as a reply, if this is a reply frame.
    #[must_use]
    pub fn as_reply(&self) -> Option<Reply> {
        if !self.is_reply() {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_event_names() {
        assert_eq!(ControlEvent::from_event("phx_join"), Some(ControlEvent::Join));
        assert_eq!(ControlEvent::from_event("leave"), Some(ControlEvent::Leave));
        assert_eq!(ControlEvent::from_event("phx_close"), Some(ControlEvent::Close));
        assert_eq!(ControlEvent::from_event("new_msg"), None);
        assert_eq!(ControlEvent::from_event("phx_heartbeat"), None);
        assert!(ControlEvent::try_from("shout").is_err());
    }

    #[test]
    fn test_reply_event_parsing() {
        assert_eq!(reply_event_name("12"), "chan_reply_12");
        assert_eq!(parse_reply_event("chan_reply_12"), Some("12"));
        assert_eq!(
            parse_reply_event("chan_reply_99999999999999999999999"),
            Some("99999999999999999999999")
        );
        assert_eq!(parse_reply_event("chan_reply_"), None);
        assert_eq!(parse_reply_event("chan_reply_x1"), None);
        assert_eq!(parse_reply_event("reply_12"), None);
    }

    #[test]
    fn test_frame_serializes_as_array() {
        let frame = Frame::join("1", "room:1", json!({"token": "t"}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!(["1", "1", "room:1", "phx_join", {"token": "t"}]));

        let broadcast: Frame =
            serde_json::from_value(json!([null, null, "room:1", "shout", {"body": "hi"}])).unwrap();
        assert_eq!(broadcast.join_ref, None);
        assert_eq!(broadcast.event, "shout");
    }

    #[test]
    fn test_reply_payload() {
        let frame = Frame::reply(Some("1".into()), "3", "room:1", "ok", json!({"id": 1}));
        let reply = frame.as_reply().unwrap();
        assert_eq!(reply.status(), ReplyStatus::Ok);
        assert_eq!(reply.response, json!({"id": 1}));

        let other = Frame::reply(None, "4", "room:1", "pending", json!(null));
        assert_eq!(
            other.as_reply().unwrap().status(),
            ReplyStatus::Other("pending".into())
        );

        assert!(Frame::broadcast("room:1", "shout", json!({})).as_reply().is_none());
    }

    #[test]
    fn test_heartbeat_frame() {
        let frame = Frame::heartbeat("7");
        assert!(frame.is_socket_frame());
        assert_eq!(frame.event, HEARTBEAT_EVENT);
        assert_eq!(frame.msg_ref.as_deref(), Some("7"));
    }
}
