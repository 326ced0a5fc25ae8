//! Channel abstraction for Tether.
//!
//! A channel is one topic joined over the shared socket. Channels live in a
//! [`ChannelRegistry`] and are addressed by the [`ChannelHandle`] handed to
//! the consumer when they are created.

use std::collections::BTreeMap;

use tether_protocol::Frame;
use tracing::{debug, trace};

use crate::error::BridgeError;
use crate::message::{ChannelHandle, JoinSpec};
use crate::presence::PresenceTracker;

/// Join state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Joining,
    Joined,
    Errored,
    Left,
}

impl JoinState {
    /// Whether `self → next` is an allowed move.
    #[must_use]
    pub fn can_transition_to(self, next: JoinState) -> bool {
        matches!(
            (self, next),
            (JoinState::Joining, JoinState::Joined)
                | (JoinState::Joining, JoinState::Errored)
                | (JoinState::Joined, JoinState::Left)
                | (JoinState::Errored, JoinState::Left)
        )
    }

    /// Lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JoinState::Joining => "joining",
            JoinState::Joined => "joined",
            JoinState::Errored => "errored",
            JoinState::Left => "left",
        }
    }
}

/// A channel on the shared socket.
#[derive(Debug)]
pub struct Channel {
    handle: ChannelHandle,
    topic: String,
    join_ref: Option<String>,
    state: JoinState,
    presence: Option<PresenceTracker>,
    /// Frames issued before the channel could send them.
    buffer: Vec<Frame>,
}

impl Channel {
    /// Create a channel for a join request.
    #[must_use]
    pub fn new(handle: ChannelHandle, spec: &JoinSpec) -> Self {
        Self {
            handle,
            topic: spec.topic.clone(),
            join_ref: None,
            state: JoinState::Joining,
            presence: spec.presence.then(|| PresenceTracker::new(spec.topic.clone())),
            buffer: Vec::new(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn state(&self) -> JoinState {
        self.state
    }

    /// Reference of the join push, once issued.
    #[must_use]
    pub fn join_ref(&self) -> Option<&str> {
        self.join_ref.as_deref()
    }

    pub(crate) fn set_join_ref(&mut self, join_ref: impl Into<String>) {
        self.join_ref = Some(join_ref.into());
    }

    /// Presence tracker, for channels that opted in.
    pub fn presence_mut(&mut self) -> Option<&mut PresenceTracker> {
        self.presence.as_mut()
    }

    #[must_use]
    pub fn tracks_presence(&self) -> bool {
        self.presence.is_some()
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidTransition`] for a move the state
    /// machine does not allow.
    pub fn transition(&mut self, next: JoinState) -> Result<(), BridgeError> {
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::InvalidTransition {
                handle: self.handle,
                from: self.state,
                to: next,
            });
        }
        debug!(
            channel = %self.handle,
            topic = %self.topic,
            from = self.state.as_str(),
            to = next.as_str(),
            "Channel state changed"
        );
        self.state = next;
        Ok(())
    }

    /// Whether a frame from the server belongs to this channel.
    ///
    /// Frames of another join of the same topic carry a different join
    /// reference and are not ours.
    #[must_use]
    pub fn owns(&self, frame: &Frame) -> bool {
        frame.topic == self.topic
            && match (&frame.join_ref, &self.join_ref) {
                (None, _) => true,
                (Some(theirs), Some(ours)) => theirs == ours,
                (Some(_), None) => false,
            }
    }

    /// Hold a frame until the channel can send it.
    pub fn buffer(&mut self, frame: Frame) {
        trace!(channel = %self.handle, event = %frame.event, "Push buffered");
        self.buffer.push(frame);
    }

    /// Take every buffered frame, oldest first.
    pub fn take_buffer(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.buffer)
    }

    /// Drop buffered frames whose push reference no longer passes `keep`.
    pub fn retain_buffered(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.buffer
            .retain(|frame| frame.msg_ref.as_deref().is_some_and(&mut keep));
    }

    /// Number of buffered frames.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Arena of live channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<ChannelHandle, Channel>,
    next_handle: u64,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel and return its handle. Handles are never reused.
    pub fn create(&mut self, spec: &JoinSpec) -> ChannelHandle {
        self.next_handle += 1;
        let handle = ChannelHandle(self.next_handle);
        self.channels.insert(handle, Channel::new(handle, spec));
        debug!(channel = %handle, topic = %spec.topic, presence = spec.presence, "Channel created");
        handle
    }

    #[must_use]
    pub fn get(&self, handle: ChannelHandle) -> Option<&Channel> {
        self.channels.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ChannelHandle) -> Option<&mut Channel> {
        self.channels.get_mut(&handle)
    }

    /// Look up a live channel.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownChannel`] if the handle is not live.
    pub fn require(&mut self, handle: ChannelHandle) -> Result<&mut Channel, BridgeError> {
        self.channels
            .get_mut(&handle)
            .ok_or(BridgeError::UnknownChannel(handle))
    }

    /// Destroy a channel.
    pub fn remove(&mut self, handle: ChannelHandle) -> Option<Channel> {
        let channel = self.channels.remove(&handle);
        if let Some(channel) = &channel {
            debug!(channel = %handle, topic = %channel.topic, "Channel destroyed");
        }
        channel
    }

    /// Destroy every channel, in handle order.
    pub fn drain(&mut self) -> Vec<Channel> {
        std::mem::take(&mut self.channels).into_values().collect()
    }

    /// Handles of the channels a frame belongs to, in handle order.
    #[must_use]
    pub fn owners(&self, frame: &Frame) -> Vec<ChannelHandle> {
        self.channels
            .values()
            .filter(|channel| channel.owns(frame))
            .map(Channel::handle)
            .collect()
    }

    /// Iterate live channels in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
