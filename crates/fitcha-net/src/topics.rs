//! Realtime topic tracking.
//!
//! Maintains an in-memory map of the channels the socket has joined (or is
//! joining), keyed by [`ChannelKey`], together with the join reference the
//! server will echo back in its reply.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use fitcha_shared::protocol::ChannelKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    /// Join frame sent, no reply yet.
    Joining,
    Joined,
    /// The server rejected the join or errored the channel.
    Failed,
}

/// Information about one tracked topic.
#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub key: ChannelKey,
    /// Reference sent with the join frame.
    pub join_ref: String,
    pub state: TopicState,
    pub requested_at: Instant,
}

/// Tracks all topics the socket currently cares about.
#[derive(Debug, Clone, Default)]
pub struct TopicTracker {
    topics: HashMap<ChannelKey, TopicInfo>,
}

impl TopicTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a join frame was sent for `key`.
    pub fn on_join_sent(&mut self, key: ChannelKey, join_ref: String) {
        debug!(topic = %key, join_ref = %join_ref, "Tracking topic join");

        self.topics.insert(
            key,
            TopicInfo {
                key,
                join_ref,
                state: TopicState::Joining,
                requested_at: Instant::now(),
            },
        );
    }

    /// Topic whose pending join carries `reference`.
    pub fn find_by_ref(&self, reference: &str) -> Option<ChannelKey> {
        self.topics
            .values()
            .find(|info| info.join_ref == reference)
            .map(|info| info.key)
    }

    /// Mark `key` joined. Returns how long the join took.
    pub fn mark_joined(&mut self, key: &ChannelKey) -> Option<Duration> {
        let info = self.topics.get_mut(key)?;
        info.state = TopicState::Joined;
        Some(info.requested_at.elapsed())
    }

    pub fn mark_failed(&mut self, key: &ChannelKey) {
        if let Some(info) = self.topics.get_mut(key) {
            info.state = TopicState::Failed;
            debug!(topic = %key, "Topic marked failed");
        }
    }

    /// Stop tracking `key`. Returns whether it was tracked.
    pub fn remove(&mut self, key: &ChannelKey) -> bool {
        self.topics.remove(key).is_some()
    }

    /// Whether a lifecycle frame for `join_ref` concerns the current join of
    /// `key`. Frames without a reference apply to whatever is tracked.
    pub fn is_current(&self, key: &ChannelKey, join_ref: Option<&str>) -> bool {
        match (self.topics.get(key), join_ref) {
            (Some(info), Some(join_ref)) => info.join_ref == join_ref,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn join_ref(&self, key: &ChannelKey) -> Option<&str> {
        self.topics.get(key).map(|info| info.join_ref.as_str())
    }

    /// Whether change events for `key` should be delivered.
    pub fn accepts_events(&self, key: &ChannelKey) -> bool {
        matches!(
            self.state(key),
            Some(TopicState::Joining) | Some(TopicState::Joined)
        )
    }

    pub fn state(&self, key: &ChannelKey) -> Option<TopicState> {
        self.topics.get(key).map(|info| info.state)
    }

    pub fn tracked_keys(&self) -> Vec<ChannelKey> {
        self.topics.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn joined_count(&self) -> usize {
        self.topics
            .values()
            .filter(|info| info.state == TopicState::Joined)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitcha_shared::types::{ConversationId, UserId};

    #[test]
    fn test_join_reply_leave() {
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::Conversation(ConversationId::new());

        assert!(!tracker.accepts_events(&key));
        tracker.on_join_sent(key, "1".into());
        assert_eq!(tracker.state(&key), Some(TopicState::Joining));
        assert!(tracker.accepts_events(&key));

        assert_eq!(tracker.find_by_ref("1"), Some(key));
        tracker.mark_joined(&key);
        assert_eq!(tracker.joined_count(), 1);

        assert!(tracker.remove(&key));
        assert!(!tracker.remove(&key));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_failed_topic_drops_events() {
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::MyNotifications(UserId::new());

        tracker.on_join_sent(key, "7".into());
        tracker.mark_failed(&key);
        assert!(!tracker.accepts_events(&key));
        assert_eq!(tracker.joined_count(), 0);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_rejoin_replaces_ref() {
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::MyConversations(UserId::new());

        tracker.on_join_sent(key, "1".into());
        tracker.on_join_sent(key, "2".into());
        assert_eq!(tracker.find_by_ref("1"), None);
        assert_eq!(tracker.find_by_ref("2"), Some(key));
        assert_eq!(tracker.tracked_keys(), vec![key]);
    }

    #[test]
    fn test_stale_join_ref_is_not_current() {
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::Conversation(ConversationId::new());

        assert!(!tracker.is_current(&key, Some("1")));
        tracker.on_join_sent(key, "1".into());
        assert!(tracker.mark_joined(&key).is_some());
        tracker.remove(&key);
        tracker.on_join_sent(key, "3".into());

        assert!(!tracker.is_current(&key, Some("1")));
        assert!(tracker.is_current(&key, Some("3")));
        assert!(tracker.is_current(&key, None));
        assert_eq!(tracker.join_ref(&key), Some("3"));
    }
}
