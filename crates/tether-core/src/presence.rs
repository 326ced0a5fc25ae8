//! Presence tracking for Tether.
//!
//! The server describes who is in a channel with a full `presence_state`
//! followed by incremental `presence_diff` frames. [`PresenceSet`] folds those
//! into identity → metas, and [`PresenceTracker`] turns each applied frame
//! into `joined`, `left` and `synced` notifications.
//!
//! Every meta carries a `phx_ref` naming the session it belongs to; one
//! identity may have several sessions open at once.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::message::{PresenceEvent, PresenceUpdate};

/// Metadata records of one identity, one per session.
pub type Metas = Vec<Value>;

/// Identity → metas, in enumeration order.
pub type PresenceMap = IndexMap<String, Metas>;

fn session_ref(meta: &Value) -> Option<&Value> {
    meta.get("phx_ref")
}

/// Parse a `{identity: {"metas": [...]}}` object.
///
/// Returns `None` if the payload does not have that shape.
#[must_use]
pub fn parse_map(payload: &Value) -> Option<PresenceMap> {
    payload
        .as_object()?
        .iter()
        .map(|(key, entry)| {
            let metas = entry.get("metas")?.as_array()?.clone();
            Some((key.clone(), metas))
        })
        .collect()
}

/// A set of joins and leaves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceDiff {
    pub joins: PresenceMap,
    pub leaves: PresenceMap,
}

impl PresenceDiff {
    /// Parse a `presence_diff` payload.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let empty = Value::Object(serde_json::Map::new());
        let joins = parse_map(payload.get("joins").unwrap_or(&empty))?;
        let leaves = parse_map(payload.get("leaves").unwrap_or(&empty))?;
        Some(Self { joins, leaves })
    }

    /// Whether the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty()
    }
}

/// Current presences of a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSet {
    entries: PresenceMap,
}

impl PresenceSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of present identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metas of one identity.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&[Value]> {
        self.entries.get(identity).map(Vec::as_slice)
    }

    /// Every identity with its metas, in enumeration order.
    #[must_use]
    pub fn list(&self) -> Vec<(String, Metas)> {
        self.entries
            .iter()
            .map(|(key, metas)| (key.clone(), metas.clone()))
            .collect()
    }

    /// Reconcile against a full state and replace the set with it.
    ///
    /// Returns the joins and leaves that the state amounted to. Afterwards
    /// identities and their sessions enumerate in the state's order.
    pub fn apply_state(&mut self, state: PresenceMap) -> PresenceDiff {
        let mut diff = PresenceDiff::default();

        for (key, current) in &self.entries {
            if !state.contains_key(key) {
                diff.leaves.insert(key.clone(), current.clone());
            }
        }

        for (key, metas) in &state {
            match self.entries.get(key) {
                Some(current) => {
                    let joined: Metas = metas
                        .iter()
                        .filter(|m| !current.iter().any(|c| session_ref(c) == session_ref(m)))
                        .cloned()
                        .collect();
                    let left: Metas = current
                        .iter()
                        .filter(|c| !metas.iter().any(|m| session_ref(m) == session_ref(c)))
                        .cloned()
                        .collect();
                    if !joined.is_empty() {
                        diff.joins.insert(key.clone(), joined);
                    }
                    if !left.is_empty() {
                        diff.leaves.insert(key.clone(), left);
                    }
                }
                None => {
                    diff.joins.insert(key.clone(), metas.clone());
                }
            }
        }

        self.entries = state;
        diff
    }

    /// Apply joins then leaves.
    ///
    /// A join keeps the identity's existing sessions ahead of the joined
    /// ones. An identity left with no sessions is removed.
    pub fn apply_diff(&mut self, diff: &PresenceDiff) {
        for (key, joined) in &diff.joins {
            let mut metas: Metas = self
                .entries
                .get(key)
                .map(|current| {
                    current
                        .iter()
                        .filter(|c| !joined.iter().any(|j| session_ref(j) == session_ref(c)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            metas.extend(joined.iter().cloned());
            self.entries.insert(key.clone(), metas);
        }

        for (key, left) in &diff.leaves {
            let Some(current) = self.entries.get_mut(key) else {
                continue;
            };
            current.retain(|c| !left.iter().any(|l| session_ref(l) == session_ref(c)));
            if current.is_empty() {
                self.entries.shift_remove(key);
            }
        }
    }
}

/// Presence aggregation for one channel.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    topic: String,
    set: PresenceSet,
    synced: bool,
    pending: Vec<PresenceDiff>,
}

impl PresenceTracker {
    /// Create a tracker for `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            set: PresenceSet::new(),
            synced: false,
            pending: Vec::new(),
        }
    }

    /// The presences known so far.
    #[must_use]
    pub fn set(&self) -> &PresenceSet {
        &self.set
    }

    /// Number of diffs waiting for the first state.
    #[must_use]
    pub fn pending_diffs(&self) -> usize {
        self.pending.len()
    }

    /// Apply a `presence_state` payload.
    pub fn on_state(&mut self, payload: &Value) -> Vec<PresenceUpdate> {
        let Some(state) = parse_map(payload) else {
            warn!(topic = %self.topic, "Malformed presence state ignored");
            return Vec::new();
        };

        let diff = self.set.apply_state(state);
        let mut updates = self.updates_for(&diff);

        if !self.synced {
            self.synced = true;
            for diff in std::mem::take(&mut self.pending) {
                self.set.apply_diff(&diff);
                updates.extend(self.updates_for(&diff));
            }
        }

        updates
    }

    /// Apply a `presence_diff` payload, or hold it until the first state.
    pub fn on_diff(&mut self, payload: &Value) -> Vec<PresenceUpdate> {
        let Some(diff) = PresenceDiff::from_payload(payload) else {
            warn!(topic = %self.topic, "Malformed presence diff ignored");
            return Vec::new();
        };

        if !self.synced {
            debug!(topic = %self.topic, "Presence diff buffered until state arrives");
            self.pending.push(diff);
            return Vec::new();
        }

        self.set.apply_diff(&diff);
        self.updates_for(&diff)
    }

    fn updates_for(&self, diff: &PresenceDiff) -> Vec<PresenceUpdate> {
        let single = |event_name, key: &String| PresenceUpdate {
            event_name,
            topic: self.topic.clone(),
            presences: vec![(key.clone(), self.set.get(key).map(<[Value]>::to_vec).unwrap_or_default())],
        };

        let mut updates: Vec<PresenceUpdate> = diff
            .joins
            .keys()
            .map(|key| single(PresenceEvent::Joined, key))
            .chain(diff.leaves.keys().map(|key| single(PresenceEvent::Left, key)))
            .collect();

        updates.push(PresenceUpdate {
            event_name: PresenceEvent::Synced,
            topic: self.topic.clone(),
            presences: self.set.list(),
        });
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(updates: &[PresenceUpdate]) -> Vec<(PresenceEvent, Vec<String>)> {
        updates
            .iter()
            .map(|u| (u.event_name, u.presences.iter().map(|(k, _)| k.clone()).collect()))
            .collect()
    }

    #[test]
    fn test_state_then_diff() {
        let mut tracker = PresenceTracker::new("room:1");

        let updates = tracker.on_state(&json!({
            "alice": {"metas": [{"phx_ref": "a1"}]},
            "bob": {"metas": [{"phx_ref": "b1"}]}
        }));
        assert_eq!(
            names(&updates),
            vec![
                (PresenceEvent::Joined, vec!["alice".into()]),
                (PresenceEvent::Joined, vec!["bob".into()]),
                (PresenceEvent::Synced, vec!["alice".into(), "bob".into()]),
            ]
        );

        let updates = tracker.on_diff(&json!({
            "joins": {"carol": {"metas": [{"phx_ref": "c1"}]}},
            "leaves": {"alice": {"metas": [{"phx_ref": "a1"}]}}
        }));
        assert_eq!(
            names(&updates),
            vec![
                (PresenceEvent::Joined, vec!["carol".into()]),
                (PresenceEvent::Left, vec!["alice".into()]),
                (PresenceEvent::Synced, vec!["bob".into(), "carol".into()]),
            ]
        );
        assert_eq!(updates[1].presences[0].1, Vec::<Value>::new());
    }

    #[test]
    fn test_diffs_before_state_are_buffered() {
        let mut tracker = PresenceTracker::new("room:1");

        let early = tracker.on_diff(&json!({
            "joins": {"bob": {"metas": [{"phx_ref": "b2"}]}},
            "leaves": {}
        }));
        assert!(early.is_empty());
        assert_eq!(tracker.pending_diffs(), 1);

        let updates = tracker.on_state(&json!({"bob": {"metas": [{"phx_ref": "b1"}]}}));
        assert_eq!(tracker.pending_diffs(), 0);

        let last = updates.last().unwrap();
        assert_eq!(last.event_name, PresenceEvent::Synced);
        assert_eq!(
            last.presences,
            vec![("bob".to_string(), vec![json!({"phx_ref": "b1"}), json!({"phx_ref": "b2"})])]
        );
    }

    #[test]
    fn test_state_reconciles_sessions() {
        let mut set = PresenceSet::new();
        set.apply_state(parse_map(&json!({
            "alice": {"metas": [{"phx_ref": "a1"}, {"phx_ref": "a2"}]},
            "bob": {"metas": [{"phx_ref": "b1"}]}
        })).unwrap());

        let diff = set.apply_state(parse_map(&json!({
            "alice": {"metas": [{"phx_ref": "a2"}, {"phx_ref": "a3"}]}
        })).unwrap());

        assert_eq!(diff.joins.get("alice").unwrap(), &vec![json!({"phx_ref": "a3"})]);
        assert_eq!(diff.leaves.get("alice").unwrap(), &vec![json!({"phx_ref": "a1"})]);
        assert!(diff.leaves.contains_key("bob"));
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("alice").unwrap(),
            &[json!({"phx_ref": "a2"}), json!({"phx_ref": "a3"})]
        );
    }

    #[test]
    fn test_resync_follows_state_order() {
        let mut tracker = PresenceTracker::new("room:1");
        tracker.on_state(&json!({
            "alice": {"metas": [{"phx_ref": "a1"}, {"phx_ref": "a2"}]},
            "bob": {"metas": [{"phx_ref": "b1"}]}
        }));

        let updates = tracker.on_state(&json!({
            "bob": {"metas": [{"phx_ref": "b1"}]},
            "alice": {"metas": [{"phx_ref": "a2"}, {"phx_ref": "a1"}]}
        }));
        assert_eq!(
            names(&updates),
            vec![(PresenceEvent::Synced, vec!["bob".into(), "alice".into()])]
        );
        assert_eq!(
            tracker.set().get("alice").unwrap(),
            &[json!({"phx_ref": "a2"}), json!({"phx_ref": "a1"})]
        );

        let diff = tracker.set().clone().apply_state(PresenceMap::new());
        assert_eq!(diff.leaves.len(), 2);
        assert!(!diff.is_empty());
        assert!(PresenceDiff::default().is_empty());
    }

    #[test]
    fn test_partial_leave_keeps_identity() {
        let mut tracker = PresenceTracker::new("room:1");
        tracker.on_state(&json!({"alice": {"metas": [{"phx_ref": "a1"}, {"phx_ref": "a2"}]}}));

        let updates = tracker.on_diff(&json!({
            "joins": {},
            "leaves": {"alice": {"metas": [{"phx_ref": "a1"}]}}
        }));
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].event_name, PresenceEvent::Left);
        assert_eq!(updates[0].presences[0].1, vec![json!({"phx_ref": "a2"})]);
        assert_eq!(updates[1].presences.len(), 1);
    }

    #[test]
    fn test_malformed_payload_is_ignored() {
        let mut tracker = PresenceTracker::new("room:1");
        assert!(tracker.on_state(&json!([1, 2])).is_empty());
        assert!(tracker.on_diff(&json!({"joins": {"x": {"nope": 1}}})).is_empty());
        assert!(tracker.set().is_empty());
    }
}
