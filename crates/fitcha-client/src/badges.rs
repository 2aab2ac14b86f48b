//! Header badge counters derived from the reconciled containers.

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use fitcha_shared::constants::BADGE_CAP;

use crate::containers::{ConversationList, GameRequests, NotificationCenter};
use crate::events::{emit_event, ClientEvent, EventBus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BadgeCounts {
    pub unread_messages: i64,
    pub unread_notifications: i64,
    pub pending_game_requests: i64,
}

impl BadgeCounts {
    /// Read the counters off the containers, clamped at zero.
    pub fn derive(
        conversations: &ConversationList,
        notifications: &NotificationCenter,
        game_requests: &GameRequests,
    ) -> Self {
        Self {
            unread_messages: conversations.unread_count().max(0),
            unread_notifications: notifications.unread_count().max(0),
            pending_game_requests: game_requests.pending_count().max(0),
        }
    }

    pub fn messages_label(&self) -> Option<String> {
        badge_label(self.unread_messages)
    }

    pub fn notifications_label(&self) -> Option<String> {
        badge_label(self.unread_notifications)
    }

    pub fn game_requests_label(&self) -> Option<String> {
        badge_label(self.pending_game_requests)
    }
}

/// Text shown on a badge: nothing for zero (or below), the number up to
/// the cap, then `"9+"`.
pub fn badge_label(count: i64) -> Option<String> {
    match count {
        n if n <= 0 => None,
        n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}

/// Latest [`BadgeCounts`], published through a watch channel.
#[derive(Clone)]
pub struct Badges {
    tx: std::sync::Arc<watch::Sender<BadgeCounts>>,
}

impl Badges {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BadgeCounts::default());
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn current(&self) -> BadgeCounts {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BadgeCounts> {
        self.tx.subscribe()
    }

    /// Publish `counts` if they differ from the last value. Returns whether
    /// anything changed.
    pub fn publish(&self, counts: BadgeCounts, events: &EventBus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == counts {
                return false;
            }
            *current = counts;
            true
        });
        if changed {
            debug!(?counts, "Badges updated");
            emit_event(events, ClientEvent::BadgesChanged(counts));
        }
        changed
    }

    /// Recompute on every change of a counted container until the event
    /// bus closes.
    pub async fn run(
        self,
        events: EventBus,
        conversations: ConversationList,
        notifications: NotificationCenter,
        game_requests: GameRequests,
    ) {
        let mut rx = events.subscribe();
        self.publish(
            BadgeCounts::derive(&conversations, &notifications, &game_requests),
            &events,
        );
        loop {
            match rx.recv().await {
                Ok(
                    ClientEvent::ConversationsChanged
                    | ClientEvent::NotificationsChanged
                    | ClientEvent::GameRequestsChanged
                    | ClientEvent::IdentityChanged { .. },
                )
                | Err(broadcast::error::RecvError::Lagged(_)) => {
                    self.publish(
                        BadgeCounts::derive(&conversations, &notifications, &game_requests),
                        &events,
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl Default for Badges {
    fn default() -> Self {
        Self::new()
    }
}
