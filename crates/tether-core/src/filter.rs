//! Channel message filter.
//!
//! Every frame addressed to a channel is classified once. Control and
//! reply-correlation frames stay inside the bridge; everything else is
//! forwarded to the consumer in arrival order.

use tether_protocol::frames::parse_reply_event;
use tether_protocol::{ControlEvent, Frame};

use crate::message::ChannelMessage;

/// Classification of an incoming channel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Lifecycle control event, prefixed (`phx_join`) or bare (`join`).
    Control(ControlEvent),
    /// Per-push reply event (`chan_reply_<digits>`).
    ReplyCorrelation,
    /// Anything else.
    User,
}

impl FrameClass {
    /// Whether frames of this class reach the consumer.
    #[must_use]
    pub fn is_user_visible(self) -> bool {
        matches!(self, FrameClass::User)
    }
}

/// Classify an event name.
#[must_use]
pub fn classify(event: &str) -> FrameClass {
    if let Some(control) = ControlEvent::from_event(event) {
        return FrameClass::Control(control);
    }
    if parse_reply_event(event).is_some() {
        return FrameClass::ReplyCorrelation;
    }
    FrameClass::User
}

/// Build the consumer message for a frame, or `None` if it is suppressed.
///
/// The frame is only borrowed so reply routing still sees it untouched.
#[must_use]
pub fn forward(frame: &Frame) -> Option<ChannelMessage> {
    classify(&frame.event)
        .is_user_visible()
        .then(|| ChannelMessage {
            topic: frame.topic.clone(),
            event: frame.event.clone(),
            payload: frame.payload.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_events_are_suppressed() {
        for control in ControlEvent::ALL {
            assert_eq!(classify(control.wire_name()), FrameClass::Control(control));
            assert_eq!(classify(control.bare_name()), FrameClass::Control(control));
        }
    }

    #[test]
    fn test_reply_correlation_is_suppressed() {
        assert_eq!(classify("chan_reply_12"), FrameClass::ReplyCorrelation);
        assert!(!classify("chan_reply_12").is_user_visible());
    }

    #[test]
    fn test_oversized_reply_reference_is_suppressed() {
        let event = "chan_reply_99999999999999999999999";
        assert_eq!(classify(event), FrameClass::ReplyCorrelation);
        assert!(forward(&Frame::broadcast("room:1", event, json!({}))).is_none());
    }

    #[test]
    fn test_user_events_pass() {
        assert_eq!(classify("shout"), FrameClass::User);
        assert_eq!(classify("presence_diff"), FrameClass::User);
        assert_eq!(classify("chan_reply_"), FrameClass::User);
        assert_eq!(classify("phx_custom"), FrameClass::User);
    }

    #[test]
    fn test_forward_leaves_frame_intact() {
        let frame = Frame::broadcast("room:1", "shout", json!({"body": "hi"}));
        let msg = forward(&frame).unwrap();
        assert_eq!(msg.topic, "room:1");
        assert_eq!(msg.payload, frame.payload);

        let reply = Frame::reply(Some("1".into()), "1", "room:1", "ok", json!({}));
        assert!(forward(&reply).is_none());
        assert!(reply.as_reply().is_some());
    }
}
