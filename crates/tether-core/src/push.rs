//! Push acknowledgement router.
//!
//! Every join, leave and user push is registered here under its wire
//! reference. The first terminal outcome settles it; anything arriving later
//! for the same reference finds nothing and is dropped.

use std::collections::HashMap;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::message::{AckHandlers, AckKind, ChannelHandle, PushKind, PushReply};

/// Terminal outcome of a push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Server replied `ok` with this response.
    Ok(Value),
    /// Server replied `error` with this response.
    Error(Value),
    /// No reply before the deadline.
    Timeout,
}

impl PushOutcome {
    /// Acknowledgement kind of this outcome.
    #[must_use]
    pub fn kind(&self) -> AckKind {
        match self {
            PushOutcome::Ok(_) => AckKind::Ok,
            PushOutcome::Error(_) => AckKind::Error,
            PushOutcome::Timeout => AckKind::Timeout,
        }
    }

    fn into_payload(self) -> Value {
        match self {
            PushOutcome::Ok(v) | PushOutcome::Error(v) => v,
            PushOutcome::Timeout => Value::Null,
        }
    }
}

/// A push waiting for its outcome.
#[derive(Debug, Clone)]
pub struct PendingPush {
    pub channel: ChannelHandle,
    pub topic: String,
    pub kind: PushKind,
    /// Caller reference, echoed verbatim.
    pub caller_ref: Value,
    pub acks: AckHandlers,
    pub deadline: Instant,
}

/// A push together with the outcome that settled it.
#[derive(Debug, Clone)]
pub struct Settled {
    pub push: PendingPush,
    pub outcome: PushOutcome,
}

impl Settled {
    /// The boundary reply, if the caller asked for this outcome kind.
    #[must_use]
    pub fn reply(&self) -> Option<PushReply> {
        let kind = self.outcome.kind();
        if !self.push.acks.wants(kind) {
            return None;
        }
        Some(PushReply {
            event_name: kind,
            topic: self.push.topic.clone(),
            push_type: self.push.kind,
            push_ref: self.push.caller_ref.clone(),
            payload: self.outcome.clone().into_payload(),
        })
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    push: PendingPush,
}

/// Pending pushes keyed by wire reference.
#[derive(Debug, Default)]
pub struct PushRouter {
    pending: HashMap<String, Entry>,
    seq: u64,
}

impl PushRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a push.
    pub fn register(&mut self, wire_ref: impl Into<String>, push: PendingPush) {
        let wire_ref = wire_ref.into();
        trace!(wire_ref = %wire_ref, topic = %push.topic, kind = push.kind.as_str(), "Push registered");
        self.seq += 1;
        self.pending.insert(
            wire_ref,
            Entry {
                seq: self.seq,
                push,
            },
        );
    }

    /// Settle the push registered under `wire_ref` on `topic`.
    ///
    /// Returns `None` if nothing is pending under that reference, which is
    /// the case for any outcome after the first.
    pub fn resolve(&mut self, wire_ref: &str, topic: &str, outcome: PushOutcome) -> Option<Settled> {
        let push = self.take(wire_ref, topic)?;
        Some(Settled { push, outcome })
    }

    /// Stop tracking a push without producing an outcome.
    pub fn take(&mut self, wire_ref: &str, topic: &str) -> Option<PendingPush> {
        match self.pending.get(wire_ref) {
            Some(entry) if entry.push.topic == topic => {
                self.pending.remove(wire_ref).map(|entry| entry.push)
            }
            Some(_) => {
                debug!(wire_ref = %wire_ref, topic = %topic, "Reply topic does not match push");
                None
            }
            None => {
                debug!(wire_ref = %wire_ref, topic = %topic, "No pending push for reply");
                None
            }
        }
    }

    /// Time out every push whose deadline is at or before `now`, earliest
    /// first.
    pub fn expire(&mut self, now: Instant) -> Vec<Settled> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.push.deadline <= now)
            .map(|(wire_ref, _)| wire_ref.clone())
            .collect();

        let mut expired: Vec<Entry> = due
            .iter()
            .filter_map(|wire_ref| self.pending.remove(wire_ref))
            .collect();
        expired.sort_by_key(|entry| (entry.push.deadline, entry.seq));

        expired
            .into_iter()
            .map(|entry| Settled {
                push: entry.push,
                outcome: PushOutcome::Timeout,
            })
            .collect()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.push.deadline).min()
    }

    /// Whether a push is still pending under `wire_ref`.
    #[must_use]
    pub fn contains(&self, wire_ref: &str) -> bool {
        self.pending.contains_key(wire_ref)
    }

    /// Number of pending pushes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn pending(kind: PushKind, acks: AckHandlers, caller_ref: Value, deadline: Instant) -> PendingPush {
        PendingPush {
            channel: ChannelHandle(1),
            topic: "room:1".into(),
            kind,
            caller_ref,
            acks,
            deadline,
        }
    }

    #[test]
    fn test_first_outcome_wins() {
        let now = Instant::now();
        let mut router = PushRouter::new();
        router.register("5", pending(PushKind::Msg, AckHandlers::ALL, json!("r5"), now));

        let settled = router
            .resolve("5", "room:1", PushOutcome::Ok(json!({"n": 1})))
            .unwrap();
        let reply = settled.reply().unwrap();
        assert_eq!(reply.event_name, AckKind::Ok);
        assert_eq!(reply.push_ref, json!("r5"));
        assert_eq!(reply.payload, json!({"n": 1}));

        assert!(router.resolve("5", "room:1", PushOutcome::Error(json!({}))).is_none());
        assert!(router.expire(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_unrequested_kind_is_silent() {
        let now = Instant::now();
        let mut router = PushRouter::new();
        router.register("1", pending(PushKind::Join, AckHandlers::NONE, Value::Null, now));

        let settled = router.resolve("1", "room:1", PushOutcome::Ok(json!({}))).unwrap();
        assert!(settled.reply().is_none());
        assert!(router.is_empty());
    }

    #[test]
    fn test_topic_mismatch_keeps_push() {
        let now = Instant::now();
        let mut router = PushRouter::new();
        router.register("1", pending(PushKind::Msg, AckHandlers::ALL, Value::Null, now));

        assert!(router.resolve("1", "room:2", PushOutcome::Ok(json!({}))).is_none());
        assert!(router.contains("1"));
    }

    #[test]
    fn test_expire_in_deadline_order() {
        let now = Instant::now();
        let mut router = PushRouter::new();
        let late = now + Duration::from_secs(10);
        let early = now + Duration::from_secs(5);
        router.register("1", pending(PushKind::Msg, AckHandlers::ALL, json!("late"), late));
        router.register("2", pending(PushKind::Msg, AckHandlers::ALL, json!("early"), early));
        router.register("3", pending(PushKind::Msg, AckHandlers::ALL, json!("later"), late));
        assert_eq!(router.next_deadline(), Some(early));

        assert!(router.expire(now).is_empty());

        let expired = router.expire(late);
        let refs: Vec<_> = expired.iter().map(|s| s.push.caller_ref.clone()).collect();
        assert_eq!(refs, vec![json!("early"), json!("late"), json!("later")]);

        let reply = expired[0].reply().unwrap();
        assert_eq!(reply.event_name, AckKind::Timeout);
        assert_eq!(reply.payload, Value::Null);
        assert_eq!(router.next_deadline(), None);
    }

    #[test]
    fn test_leave_timeout_is_not_reported() {
        let now = Instant::now();
        let mut router = PushRouter::new();
        router.register("9", pending(PushKind::Leave, AckHandlers::LEAVE, Value::Null, now));

        let expired = router.expire(now);
        assert_eq!(expired.len(), 1);
        assert!(expired[0].reply().is_none());
    }
}
