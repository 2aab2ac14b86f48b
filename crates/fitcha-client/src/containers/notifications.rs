use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use fitcha_shared::protocol::ChannelKey;
use fitcha_shared::social::Notification;
use fitcha_shared::types::NotificationId;
use fitcha_shared::RemoteError;

use super::{ClientContext, ListSource, ReloadOnPush, Snapshot};
use crate::events::{emit_event, ClientEvent};
use crate::lock;
use crate::subscriptions::SubscriptionHandle;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationsData {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

/// The viewer's latest notifications and unread count, re-fetched on
/// every inserted notification.
#[derive(Clone)]
pub struct NotificationCenter {
    shared: Arc<Shared>,
}

struct Shared {
    ctx: ClientContext,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    snapshot: Snapshot<NotificationsData>,
    epoch: u64,
    subscription: Option<SubscriptionHandle>,
}

impl NotificationCenter {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<NotificationsData> {
        lock(&self.shared.state).snapshot.clone()
    }

    pub fn unread_count(&self) -> i64 {
        lock(&self.shared.state).snapshot.data.unread_count
    }

    pub async fn mount(&self) {
        let (epoch, previous) = {
            let mut st = lock(&self.shared.state);
            st.epoch += 1;
            st.snapshot.loading = true;
            st.snapshot.live = false;
            (st.epoch, st.subscription.take())
        };
        drop(previous);

        let Some(viewer) = self.shared.ctx.viewer() else {
            {
                let mut st = lock(&self.shared.state);
                if st.epoch == epoch {
                    st.snapshot = Snapshot::default();
                }
            }
            emit_event(&self.shared.ctx.events, ClientEvent::NotificationsChanged);
            return;
        };

        let key = ChannelKey::MyNotifications(viewer);
        let handle = self
            .shared
            .ctx
            .registry
            .subscribe(key, ReloadOnPush::new(&self.shared, epoch, key))
            .await;
        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                drop(st);
                drop(handle);
                return;
            }
            st.subscription = Some(handle);
        }

        self.shared.reload().await;
    }

    pub fn unmount(&self) {
        let subscription = {
            let mut st = lock(&self.shared.state);
            st.epoch += 1;
            st.snapshot.live = false;
            st.snapshot.loading = false;
            st.subscription.take()
        };
        drop(subscription);
    }

    pub async fn refetch(&self) {
        self.mount().await;
    }

    /// Mark `ids` (or everything when `None`) as read, remotely first and
    /// then locally. A notification's `read_at` is only ever set once and
    /// the unread count never drops below zero.
    pub async fn mark_as_read(&self, ids: Option<&[NotificationId]>) -> Result<(), RemoteError> {
        if ids.is_some_and(|ids| ids.is_empty()) {
            return Ok(());
        }
        self.shared.ctx.gateway.mark_notifications_read(ids).await?;

        let now = Utc::now();
        let marked = {
            let mut st = lock(&self.shared.state);
            let mut marked = 0;
            for notification in st.snapshot.data.notifications.iter_mut() {
                let selected = ids.map_or(true, |ids| ids.contains(&notification.id));
                if selected && notification.mark_read(now) {
                    marked += 1;
                }
            }
            let data = &mut st.snapshot.data;
            data.unread_count = if ids.is_none() {
                0
            } else {
                (data.unread_count - marked).max(0)
            };
            marked
        };
        debug!(marked, "Notifications marked as read");
        emit_event(&self.shared.ctx.events, ClientEvent::NotificationsChanged);
        Ok(())
    }
}

#[async_trait]
impl ListSource for Shared {
    fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    fn set_live(&self, epoch: u64, live: bool) {
        {
            let mut st = lock(&self.state);
            if st.epoch != epoch || st.snapshot.live == live {
                return;
            }
            st.snapshot.live = live;
        }
        emit_event(&self.ctx.events, ClientEvent::NotificationsChanged);
    }

    async fn reload(&self) {
        let epoch = self.epoch();
        let (notifications, unread) = tokio::join!(
            self.ctx.gateway.notifications(),
            self.ctx.gateway.unread_notification_count(),
        );
        {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                debug!("Stale notifications fetch discarded");
                return;
            }
            let snapshot = &mut st.snapshot;
            snapshot.loading = false;
            snapshot.error = None;
            match notifications {
                Ok(list) => snapshot.data.notifications = list,
                Err(e) => snapshot.error = Some(e.message),
            }
            match unread {
                Ok(count) => snapshot.data.unread_count = count.max(0),
                Err(e) => {
                    snapshot.error.get_or_insert(e.message);
                }
            }
        }
        emit_event(&self.ctx.events, ClientEvent::NotificationsChanged);
    }
}
