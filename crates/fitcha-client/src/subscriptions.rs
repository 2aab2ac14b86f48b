//! Push subscription registry.
//!
//! Containers register a [`PushHandler`] per [`ChannelKey`] and keep the
//! returned [`SubscriptionHandle`]. The bridge task hands every realtime
//! notification to [`SubscriptionRegistry::dispatch`], which routes it to
//! the handler currently registered for that key. Releasing a handle is
//! synchronous: after `release` (or drop) returns, no later event for that
//! key reaches the released handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fitcha_net::{join_channel, leave_channel, RealtimeCommand, RealtimeNotification};
use fitcha_shared::protocol::{ChangeEvent, ChannelKey};

use crate::lock;

/// Receives the pushes of one channel.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn on_change(&self, event: ChangeEvent);

    /// The server acknowledged the join.
    fn on_joined(&self) {}

    /// The channel could not be joined or the connection dropped. The
    /// container keeps its snapshot but is no longer live.
    fn on_degraded(&self, reason: &str);
}

struct Entry {
    generation: u64,
    handler: Arc<dyn PushHandler>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<ChannelKey, Entry>,
    next_generation: u64,
    /// Bumped on every attach and detach.
    connection: u64,
    cmd_tx: Option<mpsc::Sender<RealtimeCommand>>,
    access_token: Option<String>,
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route joins and leaves through a running realtime task. Returns the
    /// connection id its notifications must be dispatched under.
    pub fn attach(
        &self,
        cmd_tx: mpsc::Sender<RealtimeCommand>,
        access_token: Option<String>,
    ) -> u64 {
        let mut inner = lock(&self.inner);
        inner.connection += 1;
        inner.cmd_tx = Some(cmd_tx);
        inner.access_token = access_token;
        inner.connection
    }

    /// Forget the realtime task. Registered handlers stay registered but
    /// will not receive anything until re-subscribed.
    pub fn detach(&self) -> Option<mpsc::Sender<RealtimeCommand>> {
        let mut inner = lock(&self.inner);
        inner.connection += 1;
        inner.access_token = None;
        inner.cmd_tx.take()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner).cmd_tx.is_some()
    }

    /// Whether `connection` is the one currently attached.
    pub fn is_current(&self, connection: u64) -> bool {
        let inner = lock(&self.inner);
        inner.cmd_tx.is_some() && inner.connection == connection
    }

    pub fn active_keys(&self) -> Vec<ChannelKey> {
        lock(&self.inner).entries.keys().copied().collect()
    }

    pub fn is_active(&self, key: &ChannelKey) -> bool {
        lock(&self.inner).entries.contains_key(key)
    }

    /// Register `handler` for `key`, replacing whatever held the key
    /// before, and ask the realtime task to join the channel.
    ///
    /// Never fails: without a connection, or when the join cannot be
    /// queued, the handler is told it is degraded.
    pub async fn subscribe(
        &self,
        key: ChannelKey,
        handler: Arc<dyn PushHandler>,
    ) -> SubscriptionHandle {
        let (generation, replaced, cmd_tx, access_token) = {
            let mut inner = lock(&self.inner);
            inner.next_generation += 1;
            let generation = inner.next_generation;
            let replaced = inner
                .entries
                .insert(
                    key,
                    Entry {
                        generation,
                        handler: handler.clone(),
                    },
                )
                .is_some();
            (
                generation,
                replaced,
                inner.cmd_tx.clone(),
                inner.access_token.clone(),
            )
        };

        let handle = SubscriptionHandle {
            registry: Arc::downgrade(&self.inner),
            key,
            generation,
            released: false,
        };

        let Some(cmd_tx) = cmd_tx else {
            debug!(topic = %key, "No realtime connection, channel not joined");
            handler.on_degraded("realtime not connected");
            return handle;
        };

        if replaced {
            leave_channel(&cmd_tx, key);
        }
        if let Err(e) = join_channel(&cmd_tx, key, access_token).await {
            warn!(topic = %key, error = %e, "Failed to join channel");
            handler.on_degraded(&e.to_string());
        }
        handle
    }

    /// Release every subscription, e.g. on sign-out.
    pub fn release_all(&self) {
        let (keys, cmd_tx) = {
            let mut inner = lock(&self.inner);
            let keys: Vec<ChannelKey> = inner.entries.drain().map(|(key, _)| key).collect();
            (keys, inner.cmd_tx.clone())
        };
        if let Some(cmd_tx) = cmd_tx {
            for key in &keys {
                leave_channel(&cmd_tx, *key);
            }
        }
        if !keys.is_empty() {
            info!(count = keys.len(), "Released all channel subscriptions");
        }
    }

    fn handler_for(&self, key: &ChannelKey) -> Option<Arc<dyn PushHandler>> {
        lock(&self.inner)
            .entries
            .get(key)
            .map(|entry| entry.handler.clone())
    }

    /// Route a notification from the task attached as `connection`.
    /// Anything from a replaced or detached task is dropped.
    pub async fn dispatch_from(&self, connection: u64, notification: RealtimeNotification) {
        if !self.is_current(connection) {
            debug!(connection, notification = ?notification, "Notification from a previous connection dropped");
            return;
        }
        self.dispatch(notification).await;
    }

    /// Route one notification of the current connection to its handler.
    pub async fn dispatch(&self, notification: RealtimeNotification) {
        match notification {
            RealtimeNotification::Change { key, event } => match self.handler_for(&key) {
                Some(handler) => handler.on_change(event).await,
                None => {
                    debug!(topic = %key, table = %event.table, "Change for unknown or released channel dropped");
                }
            },

            RealtimeNotification::Joined { key } => {
                if let Some(handler) = self.handler_for(&key) {
                    handler.on_joined();
                }
            }

            RealtimeNotification::SubscriptionFailed { key, reason } => {
                warn!(topic = %key, reason = %reason, "Channel subscription failed");
                if let Some(handler) = self.handler_for(&key) {
                    handler.on_degraded(&reason);
                }
            }

            RealtimeNotification::Disconnected { reason } => {
                let handlers: Vec<Arc<dyn PushHandler>> = {
                    let mut inner = lock(&self.inner);
                    inner.cmd_tx = None;
                    inner.entries.drain().map(|(_, entry)| entry.handler).collect()
                };
                warn!(reason = %reason, channels = handlers.len(), "Realtime connection lost");
                for handler in handlers {
                    handler.on_degraded(&reason);
                }
            }
        }
    }
}

/// Keeps one channel subscription alive. Dropping it releases the channel.
pub struct SubscriptionHandle {
    registry: Weak<Mutex<RegistryInner>>,
    key: ChannelKey,
    generation: u64,
    released: bool,
}

impl SubscriptionHandle {
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Stop routing events for this subscription and leave the channel.
    /// A no-op when the key was already taken over by a newer subscription.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let cmd_tx = {
            let mut inner = lock(&registry);
            match inner.entries.get(&self.key) {
                Some(entry) if entry.generation == self.generation => {
                    inner.entries.remove(&self.key);
                    inner.cmd_tx.clone()
                }
                _ => None,
            }
        };
        if let Some(cmd_tx) = cmd_tx {
            debug!(topic = %self.key, "Releasing channel subscription");
            leave_channel(&cmd_tx, self.key);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}
