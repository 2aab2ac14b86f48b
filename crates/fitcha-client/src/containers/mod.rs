//! Stateful containers.
//!
//! Each container owns one piece of client state (a conversation list, an
//! open thread, a game session room, ...). It loads a snapshot through the
//! [`Gateway`] when mounted, keeps it current from push events, and
//! exposes the mutations the presentation layer may trigger. State sits
//! behind a `std::sync::Mutex` that is never held across an `.await`;
//! every async completion checks the container's epoch and is discarded
//! when the container was unmounted or switched to another key meanwhile.

mod conversations;
mod friends;
mod game_requests;
mod notifications;
pub mod session_machine;
mod session_room;
mod sessions;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use fitcha_shared::protocol::{ChangeEvent, ChannelKey};
use fitcha_shared::types::{LocalIdGenerator, UserId};

use crate::events::EventBus;
use crate::gateway::Gateway;
use crate::subscriptions::{PushHandler, SubscriptionRegistry};

pub use conversations::{ConversationList, ConversationListData, ConversationThread, ThreadView};
pub use friends::{FriendRequests, Friends, FriendshipTracker, FriendshipView};
pub use game_requests::{GameRequests, GameRequestsData};
pub use notifications::{NotificationCenter, NotificationsData};
pub use session_machine::{SessionAction, Transition};
pub use session_room::{SessionRoom, SessionRoomView};
pub use sessions::SessionList;

/// What the presentation layer renders for a container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
    /// A push subscription is delivering updates.
    pub live: bool,
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            data: T::default(),
            loading: false,
            error: None,
            live: false,
        }
    }
}

/// Collaborators shared by every container of one signed-in client.
#[derive(Clone)]
pub struct ClientContext {
    pub gateway: Gateway,
    pub registry: SubscriptionRegistry,
    pub events: EventBus,
    pub local_ids: Arc<LocalIdGenerator>,
}

impl ClientContext {
    pub fn new(gateway: Gateway, registry: SubscriptionRegistry, events: EventBus) -> Self {
        Self {
            gateway,
            registry,
            events,
            local_ids: Arc::new(LocalIdGenerator::new()),
        }
    }

    pub fn viewer(&self) -> Option<UserId> {
        self.gateway.identity().current_id()
    }
}

/// A container whose pushes are answered with a full re-fetch.
#[async_trait]
pub(crate) trait ListSource: Send + Sync + 'static {
    fn epoch(&self) -> u64;
    fn set_live(&self, epoch: u64, live: bool);
    async fn reload(&self);
}

/// Push handler for list streams: any inbound row re-runs the snapshot
/// fetch of the owning container.
pub(crate) struct ReloadOnPush<S> {
    target: Weak<S>,
    epoch: u64,
    key: ChannelKey,
}

impl<S: ListSource> ReloadOnPush<S> {
    pub(crate) fn new(target: &Arc<S>, epoch: u64, key: ChannelKey) -> Arc<Self> {
        Arc::new(Self {
            target: Arc::downgrade(target),
            epoch,
            key,
        })
    }

    fn current(&self) -> Option<Arc<S>> {
        let target = self.target.upgrade()?;
        if target.epoch() != self.epoch {
            debug!(topic = %self.key, "Push for a previous mount ignored");
            return None;
        }
        Some(target)
    }
}

#[async_trait]
impl<S: ListSource> PushHandler for ReloadOnPush<S> {
    async fn on_change(&self, event: ChangeEvent) {
        let Some(target) = self.current() else {
            return;
        };
        debug!(topic = %self.key, table = %event.table, kind = ?event.kind, "List changed remotely, refetching");
        target.reload().await;
    }

    fn on_joined(&self) {
        if let Some(target) = self.current() {
            target.set_live(self.epoch, true);
        }
    }

    fn on_degraded(&self, reason: &str) {
        warn!(topic = %self.key, reason = %reason, "Live updates unavailable");
        if let Some(target) = self.current() {
            target.set_live(self.epoch, false);
        }
    }
}
