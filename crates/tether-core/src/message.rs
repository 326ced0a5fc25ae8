//! Boundary message types.
//!
//! These are the only things that cross between the bridge and its
//! consumer. Every message serializes as `{"type": ..., "payload": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_transport::{CloseInfo, Endpoint};

/// Opaque identifier of a channel, handed to the consumer at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelHandle(pub u64);

impl std::fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which acknowledgement outcomes the consumer wants to hear about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckHandlers {
    #[serde(default)]
    pub on_ok: bool,
    #[serde(default)]
    pub on_error: bool,
    #[serde(default)]
    pub on_timeout: bool,
}

impl AckHandlers {
    /// Nothing requested.
    pub const NONE: AckHandlers = AckHandlers {
        on_ok: false,
        on_error: false,
        on_timeout: false,
    };

    /// Everything requested.
    pub const ALL: AckHandlers = AckHandlers {
        on_ok: true,
        on_error: true,
        on_timeout: true,
    };

    /// Fixed set used for leave requests. Leave timeouts are not surfaced.
    pub const LEAVE: AckHandlers = AckHandlers {
        on_ok: true,
        on_error: true,
        on_timeout: false,
    };

    /// Whether the given outcome kind was requested.
    #[must_use]
    pub fn wants(&self, kind: AckKind) -> bool {
        match kind {
            AckKind::Ok => self.on_ok,
            AckKind::Error => self.on_error,
            AckKind::Timeout => self.on_timeout,
        }
    }
}

/// Terminal outcome kind of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckKind {
    Ok,
    Error,
    Timeout,
}

impl AckKind {
    /// Name used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AckKind::Ok => "ok",
            AckKind::Error => "error",
            AckKind::Timeout => "timeout",
        }
    }
}

/// What a push was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    Join,
    Leave,
    Msg,
}

impl PushKind {
    /// Name used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PushKind::Join => "join",
            PushKind::Leave => "leave",
            PushKind::Msg => "msg",
        }
    }
}

/// Request to open the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub endpoint: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl From<ConnectRequest> for Endpoint {
    fn from(req: ConnectRequest) -> Self {
        Endpoint {
            url: req.endpoint,
            params: req.params,
        }
    }
}

/// One channel to create in a `joinChannels` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    pub topic: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
    #[serde(default)]
    pub on_handlers: AckHandlers,
    #[serde(default)]
    pub presence: bool,
}

impl JoinSpec {
    /// A join with an empty payload, no acknowledgements and no presence.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: empty_object(),
            on_handlers: AckHandlers::NONE,
            presence: false,
        }
    }

    /// Set the join payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the requested acknowledgements.
    #[must_use]
    pub fn with_handlers(mut self, handlers: AckHandlers) -> Self {
        self.on_handlers = handlers;
        self
    }

    /// Opt in to presence tracking.
    #[must_use]
    pub fn with_presence(mut self) -> Self {
        self.presence = true;
        self
    }
}

/// A user event to push on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub channel: ChannelHandle,
    pub event: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
    /// Caller correlation reference, echoed verbatim in replies.
    #[serde(rename = "ref", default)]
    pub push_ref: Value,
    #[serde(default)]
    pub on_handlers: AckHandlers,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Messages from the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Inbound {
    ConnectSocket(ConnectRequest),
    JoinChannels(Vec<JoinSpec>),
    LeaveChannel(ChannelHandle),
    PushChannel(PushRequest),
}

impl Inbound {
    /// Message type name as it appears on the boundary.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Inbound::ConnectSocket(_) => "connectSocket",
            Inbound::JoinChannels(_) => "joinChannels",
            Inbound::LeaveChannel(_) => "leaveChannel",
            Inbound::PushChannel(_) => "pushChannel",
        }
    }
}

/// A user-visible channel event: `[topic, event, payload]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "(String, String, Value)", from = "(String, String, Value)")]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl From<ChannelMessage> for (String, String, Value) {
    fn from(msg: ChannelMessage) -> Self {
        (msg.topic, msg.event, msg.payload)
    }
}

impl From<(String, String, Value)> for ChannelMessage {
    fn from((topic, event, payload): (String, String, Value)) -> Self {
        Self {
            topic,
            event,
            payload,
        }
    }
}

/// Acknowledgement of a push, correlated by the caller's reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReply {
    pub event_name: AckKind,
    pub topic: String,
    pub push_type: PushKind,
    #[serde(rename = "ref")]
    pub push_ref: Value,
    pub payload: Value,
}

/// Kind of presence notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceEvent {
    Joined,
    Left,
    Synced,
}

/// Presence notification: `presences` is a list of `[identity, metas]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub event_name: PresenceEvent,
    pub topic: String,
    pub presences: Vec<(String, Vec<Value>)>,
}

/// Messages to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Outbound {
    /// Carries a `null` payload on the boundary.
    SocketOpened(()),
    SocketClosed(CloseInfo),
    ChannelsCreated(Vec<(String, ChannelHandle)>),
    ChannelMessage(ChannelMessage),
    ChannelError(String),
    PushReply(PushReply),
    PresenceUpdated(PresenceUpdate),
}

impl Outbound {
    /// Message type name as it appears on the boundary.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::SocketOpened(()) => "socketOpened",
            Outbound::SocketClosed(_) => "socketClosed",
            Outbound::ChannelsCreated(_) => "channelsCreated",
            Outbound::ChannelMessage(_) => "channelMessage",
            Outbound::ChannelError(_) => "channelError",
            Outbound::PushReply(_) => "pushReply",
            Outbound::PresenceUpdated(_) => "presenceUpdated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_join_channels_parsing() {
        let msg: Inbound = serde_json::from_value(json!({
            "type": "joinChannels",
            "payload": [{
                "topic": "room:1",
                "payload": {"token": "t"},
                "onHandlers": {"onOk": true, "onError": false, "onTimeout": false},
                "presence": true
            }, {
                "topic": "room:2"
            }]
        }))
        .unwrap();

        let Inbound::JoinChannels(specs) = msg else {
            panic!("Expected joinChannels");
        };
        assert_eq!(specs.len(), 2);
        assert!(specs[0].on_handlers.on_ok);
        assert!(specs[0].presence);
        assert_eq!(specs[1], JoinSpec::new("room:2"));
    }

    #[test]
    fn test_inbound_push_keeps_opaque_ref() {
        let msg: Inbound = serde_json::from_value(json!({
            "type": "pushChannel",
            "payload": {
                "channel": 3,
                "event": "msg",
                "payload": {"t": "hi"},
                "ref": {"seq": [1, 2]},
                "onHandlers": {"onOk": true, "onError": true, "onTimeout": true}
            }
        }))
        .unwrap();

        match msg {
            Inbound::PushChannel(req) => {
                assert_eq!(req.channel, ChannelHandle(3));
                assert_eq!(req.push_ref, json!({"seq": [1, 2]}));
                assert_eq!(req.on_handlers, AckHandlers::ALL);
            }
            other => panic!("Expected pushChannel, got {:?}", other),
        }
    }

    #[test]
    fn test_outbound_shapes() {
        assert_eq!(
            serde_json::to_value(&Outbound::SocketOpened(())).unwrap(),
            json!({"type": "socketOpened", "payload": null})
        );
        let opened: Outbound =
            serde_json::from_value(json!({"type": "socketOpened", "payload": null})).unwrap();
        assert_eq!(opened, Outbound::SocketOpened(()));

        let closed = Outbound::SocketClosed(CloseInfo::clean(1000, "bye"));
        assert_eq!(
            serde_json::to_value(&closed).unwrap(),
            json!({"type": "socketClosed", "payload": {"wasClean": true, "reason": "bye", "code": 1000}})
        );

        let created = Outbound::ChannelsCreated(vec![("room:1".into(), ChannelHandle(1))]);
        assert_eq!(
            serde_json::to_value(&created).unwrap(),
            json!({"type": "channelsCreated", "payload": [["room:1", 1]]})
        );

        let message = Outbound::ChannelMessage(ChannelMessage {
            topic: "room:1".into(),
            event: "shout".into(),
            payload: json!({"body": "hi"}),
        });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "channelMessage", "payload": ["room:1", "shout", {"body": "hi"}]})
        );

        let reply = Outbound::PushReply(PushReply {
            event_name: AckKind::Timeout,
            topic: "room:1".into(),
            push_type: PushKind::Msg,
            push_ref: json!("r1"),
            payload: Value::Null,
        });
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"type": "pushReply", "payload": {
                "eventName": "timeout", "topic": "room:1", "pushType": "msg",
                "ref": "r1", "payload": null
            }})
        );

        let presence = Outbound::PresenceUpdated(PresenceUpdate {
            event_name: PresenceEvent::Joined,
            topic: "room:1".into(),
            presences: vec![("alice".into(), vec![json!({"phx_ref": "a"})])],
        });
        assert_eq!(
            serde_json::to_value(&presence).unwrap()["payload"]["presences"],
            json!([["alice", [{"phx_ref": "a"}]]])
        );
    }

    #[test]
    fn test_leave_handlers_skip_timeout() {
        assert!(AckHandlers::LEAVE.wants(AckKind::Ok));
        assert!(AckHandlers::LEAVE.wants(AckKind::Error));
        assert!(!AckHandlers::LEAVE.wants(AckKind::Timeout));
    }
}
