//! Channel lifecycle controller.
//!
//! Creates channels, issues their joins and leaves, sends user pushes and
//! routes every frame from the server to the channels that own it. All
//! consumer-visible effects are appended to an outbox in emission order.

use std::time::Duration;

use serde_json::{Map, Value};
use tether_protocol::frames::{PRESENCE_DIFF_EVENT, PRESENCE_STATE_EVENT};
use tether_protocol::{ControlEvent, Frame, ReplyStatus};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelRegistry, JoinState};
use crate::error::BridgeError;
use crate::filter::{self, FrameClass};
use crate::message::{
    AckHandlers, ChannelHandle, JoinSpec, Outbound, PushKind, PushRequest,
};
use crate::push::{PendingPush, PushOutcome, PushRouter, Settled};
use crate::socket::SocketManager;

/// Owns the channels and their pending pushes.
#[derive(Debug)]
pub struct ChannelController {
    channels: ChannelRegistry,
    router: PushRouter,
    push_timeout: Duration,
}

impl ChannelController {
    /// Create a controller whose pushes wait `push_timeout` for a reply.
    #[must_use]
    pub fn new(push_timeout: Duration) -> Self {
        Self {
            channels: ChannelRegistry::new(),
            router: PushRouter::new(),
            push_timeout,
        }
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    #[must_use]
    pub fn pending_pushes(&self) -> usize {
        self.router.len()
    }

    /// Earliest push deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.router.next_deadline()
    }

    /// Create one channel per spec, in order, and join each of them.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotConnected`] if no socket is connecting or
    /// open. Nothing is created in that case.
    pub fn join_channels(
        &mut self,
        socket: &mut SocketManager,
        specs: Vec<JoinSpec>,
        outbox: &mut Vec<Outbound>,
    ) -> Result<(), BridgeError> {
        if !socket.is_live() {
            return Err(BridgeError::NotConnected);
        }

        let deadline = Instant::now() + self.push_timeout;
        let mut created = Vec::with_capacity(specs.len());

        for spec in &specs {
            let handle = self.channels.create(spec);
            let join_ref = socket.make_ref();
            if let Some(channel) = self.channels.get_mut(handle) {
                channel.set_join_ref(join_ref.clone());
            }

            self.router.register(
                join_ref.clone(),
                PendingPush {
                    channel: handle,
                    topic: spec.topic.clone(),
                    kind: PushKind::Join,
                    caller_ref: Value::Null,
                    acks: spec.on_handlers,
                    deadline,
                },
            );
            if let Err(e) = socket.send(Frame::join(join_ref, spec.topic.clone(), spec.payload.clone())) {
                warn!(channel = %handle, topic = %spec.topic, error = %e, "Join not sent");
            }
            created.push((spec.topic.clone(), handle));
        }

        outbox.push(Outbound::ChannelsCreated(created));
        Ok(())
    }

    /// Leave a channel.
    ///
    /// A channel that is errored, or whose socket is not open, is left
    /// locally without asking the server.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownChannel`] for a dead handle and
    /// [`BridgeError::InvalidTransition`] while the join is still pending.
    pub fn leave_channel(
        &mut self,
        socket: &mut SocketManager,
        handle: ChannelHandle,
        outbox: &mut Vec<Outbound>,
    ) -> Result<(), BridgeError> {
        let channel = self.channels.require(handle)?;
        let state = channel.state();
        if !state.can_transition_to(JoinState::Left) {
            return Err(BridgeError::InvalidTransition {
                handle,
                from: state,
                to: JoinState::Left,
            });
        }

        let push = PendingPush {
            channel: handle,
            topic: channel.topic().to_string(),
            kind: PushKind::Leave,
            caller_ref: Value::Null,
            acks: AckHandlers::LEAVE,
            deadline: Instant::now() + self.push_timeout,
        };

        if state == JoinState::Joined && socket.is_open() {
            let msg_ref = socket.make_ref();
            let join_ref = channel.join_ref().unwrap_or_default().to_string();
            let frame = Frame::leave(join_ref, msg_ref.clone(), push.topic.clone());
            self.router.register(msg_ref, push);
            socket.send(frame)?;
        } else {
            debug!(channel = %handle, state = state.as_str(), "Leaving locally");
            let settled = Settled {
                push,
                outcome: PushOutcome::Ok(Value::Object(Map::new())),
            };
            self.settle(socket, settled, outbox);
        }
        Ok(())
    }

    /// Push a user event on a channel.
    ///
    /// The push is held by the channel until it is joined and the socket is
    /// open. Its timeout runs from now either way. An errored channel never
    /// sends it, so the push is only left to time out.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownChannel`] for a dead handle.
    pub fn push(
        &mut self,
        socket: &mut SocketManager,
        request: PushRequest,
    ) -> Result<(), BridgeError> {
        let channel = self.channels.require(request.channel)?;
        let msg_ref = socket.make_ref();
        let join_ref = channel.join_ref().unwrap_or_default().to_string();
        let topic = channel.topic().to_string();

        self.router.register(
            msg_ref.clone(),
            PendingPush {
                channel: request.channel,
                topic: topic.clone(),
                kind: PushKind::Msg,
                caller_ref: request.push_ref,
                acks: request.on_handlers,
                deadline: Instant::now() + self.push_timeout,
            },
        );

        let frame = Frame::push(join_ref, msg_ref, topic, request.event, request.payload);
        match channel.state() {
            JoinState::Joined if socket.is_open() => socket.send(frame)?,
            JoinState::Errored => {
                debug!(channel = %request.channel, "Push on errored channel not sent");
            }
            _ => channel.buffer(frame),
        }
        Ok(())
    }

    /// Route a frame from the server.
    pub fn handle_frame(&mut self, socket: &mut SocketManager, frame: Frame, outbox: &mut Vec<Outbound>) {
        let owners = self.channels.owners(&frame);
        if owners.is_empty() {
            debug!(topic = %frame.topic, event = %frame.event, "Frame for no channel dropped");
            return;
        }

        if frame.is_reply() {
            self.route_reply(socket, &frame, outbox);
            return;
        }

        match filter::classify(&frame.event) {
            FrameClass::Control(ControlEvent::Error) => {
                for handle in owners {
                    self.channel_errored(handle, outbox);
                }
            }
            FrameClass::Control(ControlEvent::Close) => {
                for handle in owners {
                    self.channel_closed(handle);
                }
            }
            FrameClass::Control(control) => {
                trace!(topic = %frame.topic, event = control.wire_name(), "Control frame ignored");
            }
            FrameClass::ReplyCorrelation => {
                trace!(topic = %frame.topic, event = %frame.event, "Reply correlation frame ignored");
            }
            FrameClass::User => {
                for handle in owners {
                    self.deliver(handle, &frame, outbox);
                }
            }
        }
    }

    /// Time out every push due by `now`.
    pub fn expire(&mut self, socket: &mut SocketManager, now: Instant, outbox: &mut Vec<Outbound>) {
        let expired = self.router.expire(now);
        let mut touched = Vec::new();
        for settled in expired {
            debug!(
                topic = %settled.push.topic,
                kind = settled.push.kind.as_str(),
                "Push timed out"
            );
            if settled.push.kind == PushKind::Msg {
                touched.push(settled.push.channel);
            }
            self.settle(socket, settled, outbox);
        }

        let router = &self.router;
        for handle in touched {
            if let Some(channel) = self.channels.get_mut(handle) {
                channel.retain_buffered(|msg_ref| router.contains(msg_ref));
            }
        }
    }

    /// The socket is gone: report every live channel and destroy them all.
    ///
    /// Pending pushes are kept and time out on their own.
    pub fn connection_lost(&mut self, outbox: &mut Vec<Outbound>) {
        for channel in self.channels.iter() {
            if matches!(channel.state(), JoinState::Joining | JoinState::Joined) {
                outbox.push(Outbound::ChannelError(channel.topic().to_string()));
            }
        }
    }

    /// Destroy every channel.
    pub fn clear(&mut self) {
        let dropped = self.channels.drain();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Channels destroyed");
        }
    }

    fn route_reply(&mut self, socket: &mut SocketManager, frame: &Frame, outbox: &mut Vec<Outbound>) {
        let Some(msg_ref) = frame.msg_ref.as_deref() else {
            debug!(topic = %frame.topic, "Reply without a ref dropped");
            return;
        };
        let Some(reply) = frame.as_reply() else {
            warn!(topic = %frame.topic, msg_ref = %msg_ref, "Malformed reply dropped");
            return;
        };

        let outcome = match reply.status() {
            ReplyStatus::Ok => PushOutcome::Ok(reply.response),
            ReplyStatus::Error => PushOutcome::Error(reply.response),
            ReplyStatus::Other(status) => {
                if self.router.take(msg_ref, &frame.topic).is_some() {
                    debug!(topic = %frame.topic, status = %status, "Push settled with unknown status");
                }
                return;
            }
        };

        if let Some(settled) = self.router.resolve(msg_ref, &frame.topic, outcome) {
            self.settle(socket, settled, outbox);
        }
    }

    fn settle(&mut self, socket: &mut SocketManager, settled: Settled, outbox: &mut Vec<Outbound>) {
        let handle = settled.push.channel;
        match (settled.push.kind, &settled.outcome) {
            (PushKind::Join, PushOutcome::Ok(_)) => self.joined(socket, handle),
            (PushKind::Join, PushOutcome::Error(_)) => self.join_failed(handle),
            (PushKind::Join, PushOutcome::Timeout) => {
                self.join_failed(handle);
                self.abandon_join(socket, handle);
            }
            (PushKind::Leave, PushOutcome::Ok(_) | PushOutcome::Timeout) => self.left(handle),
            (PushKind::Leave, PushOutcome::Error(_)) | (PushKind::Msg, _) => {}
        }

        if let Some(reply) = settled.reply() {
            outbox.push(Outbound::PushReply(reply));
        }
    }

    fn joined(&mut self, socket: &mut SocketManager, handle: ChannelHandle) {
        let Some(channel) = self.channels.get_mut(handle) else {
            return;
        };
        if channel.transition(JoinState::Joined).is_err() {
            debug!(channel = %handle, state = channel.state().as_str(), "Late join reply ignored");
            return;
        }
        if !socket.is_open() {
            return;
        }
        for frame in channel.take_buffer() {
            let still_pending = frame.msg_ref.as_deref().is_some_and(|r| self.router.contains(r));
            if !still_pending {
                continue;
            }
            if let Err(e) = socket.send(frame) {
                warn!(channel = %handle, error = %e, "Buffered push not sent");
            }
        }
    }

    fn join_failed(&mut self, handle: ChannelHandle) {
        if let Some(channel) = self.channels.get_mut(handle) {
            let _ = channel.transition(JoinState::Errored);
        }
    }

    fn abandon_join(&mut self, socket: &mut SocketManager, handle: ChannelHandle) {
        let Some(channel) = self.channels.get(handle) else {
            return;
        };
        if !socket.is_open() {
            return;
        }
        let join_ref = channel.join_ref().unwrap_or_default().to_string();
        let frame = Frame::leave(join_ref, socket.make_ref(), channel.topic());
        if let Err(e) = socket.send(frame) {
            debug!(channel = %handle, error = %e, "Leave after join timeout not sent");
        }
    }

    fn left(&mut self, handle: ChannelHandle) {
        if let Some(channel) = self.channels.get_mut(handle) {
            if channel.transition(JoinState::Left).is_ok() {
                self.channels.remove(handle);
            }
        }
    }

    fn channel_errored(&mut self, handle: ChannelHandle, outbox: &mut Vec<Outbound>) {
        let Some(channel) = self.channels.get_mut(handle) else {
            return;
        };
        match channel.state() {
            JoinState::Joining => {
                let _ = channel.transition(JoinState::Errored);
            }
            JoinState::Joined => {}
            JoinState::Errored | JoinState::Left => return,
        }
        warn!(channel = %handle, topic = %channel.topic(), "Channel error");
        outbox.push(Outbound::ChannelError(channel.topic().to_string()));
    }

    fn channel_closed(&mut self, handle: ChannelHandle) {
        if let Some(channel) = self.channels.remove(handle) {
            debug!(channel = %handle, topic = %channel.topic(), "Channel closed by server");
        }
    }

    fn deliver(&mut self, handle: ChannelHandle, frame: &Frame, outbox: &mut Vec<Outbound>) {
        let Some(channel) = self.channels.get_mut(handle) else {
            return;
        };
        if let Some(message) = filter::forward(frame) {
            outbox.push(Outbound::ChannelMessage(message));
        }

        let Some(tracker) = channel.presence_mut() else {
            return;
        };
        let updates = match frame.event.as_str() {
            PRESENCE_STATE_EVENT => tracker.on_state(&frame.payload),
            PRESENCE_DIFF_EVENT => tracker.on_diff(&frame.payload),
            _ => return,
        };
        outbox.extend(updates.into_iter().map(Outbound::PresenceUpdated));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tether_transport::{memory, Endpoint, LinkOptions};

    fn push_on(channel: ChannelHandle, push_ref: &str) -> PushRequest {
        PushRequest {
            channel,
            event: "msg".into(),
            payload: json!({}),
            push_ref: json!(push_ref),
            on_handlers: AckHandlers::ALL,
        }
    }

    #[tokio::test]
    async fn test_timed_out_pushes_leave_no_buffered_frames() {
        let (transport, _listener) = memory::pair();
        let mut socket = SocketManager::new(Arc::new(transport), LinkOptions::default());
        socket.connect(Endpoint::default());

        let timeout = Duration::from_secs(10);
        let mut controller = ChannelController::new(timeout);
        let mut outbox = Vec::new();
        controller
            .join_channels(&mut socket, vec![JoinSpec::new("room:1")], &mut outbox)
            .unwrap();
        let Some(Outbound::ChannelsCreated(created)) = outbox.pop() else {
            panic!("Expected channelsCreated");
        };
        let handle = created[0].1;

        controller.push(&mut socket, push_on(handle, "early")).unwrap();
        assert_eq!(controller.channels().get(handle).unwrap().buffered(), 1);

        // Join and push both run out; the channel ends up errored.
        controller.expire(&mut socket, Instant::now() + timeout * 2, &mut outbox);
        let channel = controller.channels().get(handle).unwrap();
        assert_eq!(channel.state(), JoinState::Errored);
        assert_eq!(channel.buffered(), 0);
        assert!(matches!(
            outbox.as_slice(),
            [Outbound::PushReply(reply)] if reply.push_ref == json!("early")
        ));
        outbox.clear();

        // Pushes on an errored channel are never held, but still time out.
        for n in 0..3 {
            controller.push(&mut socket, push_on(handle, &n.to_string())).unwrap();
        }
        assert_eq!(controller.channels().get(handle).unwrap().buffered(), 0);
        assert_eq!(controller.pending_pushes(), 3);

        controller.expire(&mut socket, Instant::now() + timeout * 2, &mut outbox);
        assert_eq!(controller.pending_pushes(), 0);
        assert_eq!(outbox.len(), 3);
    }
}
