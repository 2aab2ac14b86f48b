use serde::Serialize;
use tokio::sync::broadcast;

use fitcha_shared::types::{ConversationId, SessionId, UserId};

use crate::badges::BadgeCounts;

pub const EVENT_CONVERSATIONS_CHANGED: &str = "conversations-changed";
pub const EVENT_THREAD_CHANGED: &str = "thread-changed";
pub const EVENT_SESSION_CHANGED: &str = "session-changed";
pub const EVENT_SESSIONS_CHANGED: &str = "sessions-changed";
pub const EVENT_NOTIFICATIONS_CHANGED: &str = "notifications-changed";
pub const EVENT_GAME_REQUESTS_CHANGED: &str = "game-requests-changed";
pub const EVENT_FRIENDSHIP_CHANGED: &str = "friendship-changed";
pub const EVENT_FRIEND_REQUESTS_CHANGED: &str = "friend-requests-changed";
pub const EVENT_FRIENDS_CHANGED: &str = "friends-changed";
pub const EVENT_BADGES_CHANGED: &str = "badges-changed";
pub const EVENT_IDENTITY_CHANGED: &str = "identity-changed";
pub const EVENT_REALTIME_DISCONNECTED: &str = "realtime-disconnected";

/// Announces which container changed; the presentation layer re-reads
/// that container's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    ConversationsChanged,
    ThreadChanged { conversation_id: Option<ConversationId> },
    SessionChanged { session_id: Option<SessionId> },
    SessionsChanged,
    NotificationsChanged,
    GameRequestsChanged,
    FriendshipChanged { user_id: UserId },
    FriendRequestsChanged,
    FriendsChanged,
    BadgesChanged(BadgeCounts),
    IdentityChanged { user_id: Option<UserId> },
    RealtimeDisconnected { reason: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::ConversationsChanged => EVENT_CONVERSATIONS_CHANGED,
            ClientEvent::ThreadChanged { .. } => EVENT_THREAD_CHANGED,
            ClientEvent::SessionChanged { .. } => EVENT_SESSION_CHANGED,
            ClientEvent::SessionsChanged => EVENT_SESSIONS_CHANGED,
            ClientEvent::NotificationsChanged => EVENT_NOTIFICATIONS_CHANGED,
            ClientEvent::GameRequestsChanged => EVENT_GAME_REQUESTS_CHANGED,
            ClientEvent::FriendshipChanged { .. } => EVENT_FRIENDSHIP_CHANGED,
            ClientEvent::FriendRequestsChanged => EVENT_FRIEND_REQUESTS_CHANGED,
            ClientEvent::FriendsChanged => EVENT_FRIENDS_CHANGED,
            ClientEvent::BadgesChanged(_) => EVENT_BADGES_CHANGED,
            ClientEvent::IdentityChanged { .. } => EVENT_IDENTITY_CHANGED,
            ClientEvent::RealtimeDisconnected { .. } => EVENT_REALTIME_DISCONNECTED,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub fn emit_event(bus: &EventBus, event: ClientEvent) {
    let name = event.name();
    // No receivers just means nothing is rendering right now.
    if bus.tx.send(event).is_err() {
        tracing::trace!(event = name, "No event listeners");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let bus = EventBus::default();
        emit_event(&bus, ClientEvent::SessionsChanged);

        let mut rx = bus.subscribe();
        emit_event(&bus, ClientEvent::NotificationsChanged);
        assert_eq!(rx.recv().await.unwrap(), ClientEvent::NotificationsChanged);
    }

    #[test]
    fn test_event_serializes_with_name_tag() {
        let json = serde_json::to_value(ClientEvent::RealtimeDisconnected {
            reason: "closed".into(),
        })
        .unwrap();
        assert_eq!(json["event"], EVENT_REALTIME_DISCONNECTED);
        assert_eq!(json["reason"], "closed");
    }
}
