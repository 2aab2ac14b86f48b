//! The client root.
//!
//! [`FitchaClient`] wires one backend, one identity, one realtime
//! connection and one instance of every container together. It reacts to
//! auth transitions by tearing everything down and mounting again for the
//! new user, so no container ever shows a previous user's rows.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fitcha_net::{Backend, NetError, RealtimeCommand, RealtimeConfig, RestBackend};
use fitcha_shared::protocol::ChannelKey;

use crate::badges::Badges;
use crate::bridge::start_realtime_and_bridge;
use crate::config::ClientConfig;
use crate::containers::{
    ClientContext, ConversationList, ConversationThread, FriendRequests, Friends,
    FriendshipTracker, GameRequests, NotificationCenter, SessionList, SessionRoom,
};
use crate::events::{emit_event, ClientEvent, EventBus};
use crate::gateway::Gateway;
use crate::identity::{AuthEvent, IdentityProvider};
use crate::lock;
use crate::subscriptions::SubscriptionRegistry;

/// One instance of every container, sharing a [`ClientContext`].
#[derive(Clone)]
pub struct Containers {
    pub conversations: ConversationList,
    pub thread: ConversationThread,
    pub session_room: SessionRoom,
    pub sessions: SessionList,
    pub notifications: NotificationCenter,
    pub game_requests: GameRequests,
    pub friendship: FriendshipTracker,
    pub friend_requests: FriendRequests,
    pub friends: Friends,
}

impl Containers {
    pub fn new(ctx: &ClientContext) -> Self {
        Self {
            conversations: ConversationList::new(ctx.clone()),
            thread: ConversationThread::new(ctx.clone()),
            session_room: SessionRoom::new(ctx.clone()),
            sessions: SessionList::new(ctx.clone()),
            notifications: NotificationCenter::new(ctx.clone()),
            game_requests: GameRequests::new(ctx.clone()),
            friendship: FriendshipTracker::new(ctx.clone()),
            friend_requests: FriendRequests::new(ctx.clone()),
            friends: Friends::new(ctx.clone()),
        }
    }

    /// Mount the always-on lists. Threads and rooms are opened on demand.
    pub async fn mount_all(&self) {
        tokio::join!(
            self.conversations.mount(),
            self.sessions.mount(),
            self.notifications.mount(),
            self.game_requests.mount(),
            self.friend_requests.mount(),
            self.friends.mount(None),
        );
    }

    pub fn unmount_all(&self) {
        self.conversations.unmount();
        self.thread.close();
        self.session_room.close();
        self.friendship.close();
        self.sessions.unmount();
        self.notifications.unmount();
        self.game_requests.unmount();
        self.friend_requests.unmount();
        self.friends.unmount();
    }
}

pub struct FitchaClient {
    config: ClientConfig,
    rest: Option<Arc<RestBackend>>,
    identity: IdentityProvider,
    events: EventBus,
    registry: SubscriptionRegistry,
    ctx: ClientContext,
    badges: Badges,
    containers: Containers,
    realtime: Mutex<Option<mpsc::Sender<RealtimeCommand>>>,
    badge_task: Mutex<Option<JoinHandle<()>>>,
}

impl FitchaClient {
    /// Build a client talking to the hosted service described by `config`.
    pub fn new(config: ClientConfig) -> Result<Self, NetError> {
        let rest = Arc::new(RestBackend::new(
            &config.url,
            &config.anon_key,
            config.request_timeout,
        )?);
        rest.set_access_token(config.access_token.clone());
        let backend: Arc<dyn Backend> = rest.clone();
        Ok(Self::assemble(config, backend, Some(rest), IdentityProvider::new()))
    }

    /// Build a client over any [`Backend`]. No realtime connection is made.
    pub fn with_backend(
        config: ClientConfig,
        backend: Arc<dyn Backend>,
        identity: IdentityProvider,
    ) -> Self {
        Self::assemble(config, backend, None, identity)
    }

    fn assemble(
        config: ClientConfig,
        backend: Arc<dyn Backend>,
        rest: Option<Arc<RestBackend>>,
        identity: IdentityProvider,
    ) -> Self {
        let events = EventBus::default();
        let registry = SubscriptionRegistry::new();
        let gateway = Gateway::new(backend, identity.clone())
            .with_limits(config.notification_limit, config.court_suggestion_limit);
        let ctx = ClientContext::new(gateway, registry.clone(), events.clone());
        let containers = Containers::new(&ctx);
        Self {
            config,
            rest,
            identity,
            events,
            registry,
            ctx,
            badges: Badges::new(),
            containers,
            realtime: Mutex::new(None),
            badge_task: Mutex::new(None),
        }
    }

    /// Resolve the initial identity, start badge derivation and, when
    /// signed in, connect realtime and mount the lists.
    pub async fn start(&self) {
        {
            let mut task = lock(&self.badge_task);
            if task.is_none() {
                let badges = self.badges.clone();
                let events = self.events.clone();
                let c = &self.containers;
                let (conversations, notifications, game_requests) = (
                    c.conversations.clone(),
                    c.notifications.clone(),
                    c.game_requests.clone(),
                );
                *task = Some(tokio::spawn(badges.run(
                    events,
                    conversations,
                    notifications,
                    game_requests,
                )));
            }
        }

        if self.identity.is_loading() {
            let rest = self.rest.clone();
            self.identity
                .resolve_initial(async move {
                    let rest = rest?;
                    rest.access_token()?;
                    match rest.current_user().await {
                        Ok(identity) => Some(identity),
                        Err(e) => {
                            warn!(error = %e, "Could not resolve the signed-in user");
                            None
                        }
                    }
                })
                .await;
            emit_event(
                &self.events,
                ClientEvent::IdentityChanged {
                    user_id: self.identity.current_id(),
                },
            );
        }

        if self.identity.current_id().is_some() {
            self.activate().await;
        }
    }

    /// Feed an auth transition. A change of user tears down every
    /// subscription and container before anything is mounted again.
    pub async fn handle_auth(&self, event: AuthEvent, access_token: Option<String>) {
        if let Some(rest) = &self.rest {
            rest.set_access_token(access_token);
        }
        if !self.identity.apply(event) {
            return;
        }
        self.deactivate();
        let user_id = self.identity.current_id();
        emit_event(&self.events, ClientEvent::IdentityChanged { user_id });
        if user_id.is_some() {
            self.activate().await;
        } else {
            self.containers.mount_all().await;
        }
    }

    async fn activate(&self) {
        if let Some(rest) = &self.rest {
            match rest.realtime_url() {
                Ok(url) => {
                    let config = RealtimeConfig {
                        url,
                        heartbeat: self.config.heartbeat,
                    };
                    match start_realtime_and_bridge(
                        config,
                        rest.access_token(),
                        self.registry.clone(),
                        self.events.clone(),
                    )
                    .await
                    {
                        Ok(cmd_tx) => *lock(&self.realtime) = Some(cmd_tx),
                        Err(e) => warn!(error = %e, "Realtime unavailable, lists will not be live"),
                    }
                }
                Err(e) => warn!(error = %e, "Invalid realtime endpoint"),
            }
        }
        self.containers.mount_all().await;
        info!(user = ?self.identity.current_id().map(|id| id.short()), "Client active");
    }

    fn deactivate(&self) {
        self.containers.unmount_all();
        self.registry.release_all();
        let detached = self.registry.detach();
        let realtime = lock(&self.realtime).take();
        if let Some(cmd_tx) = realtime.or(detached) {
            // A full queue or a finished task both mean the socket is going away.
            let _ = cmd_tx.try_send(RealtimeCommand::Shutdown);
        }
    }

    /// Channel keys the realtime task currently tracks.
    pub async fn realtime_topics(&self) -> Result<Vec<ChannelKey>, NetError> {
        let cmd_tx = lock(&self.realtime).clone().ok_or(NetError::ChannelClosed)?;
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(RealtimeCommand::GetTopics(tx))
            .await
            .map_err(|_| NetError::ChannelClosed)?;
        rx.await.map_err(|_| NetError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        self.deactivate();
        if let Some(task) = lock(&self.badge_task).take() {
            task.abort();
        }
        info!("Client shut down");
    }

    pub fn containers(&self) -> &Containers {
        &self.containers
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn badges(&self) -> &Badges {
        &self.badges
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for FitchaClient {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.badge_task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use fitcha_shared::constants::{RPC_USER_CONVERSATIONS, TABLE_NOTIFICATIONS};
    use fitcha_shared::types::{Identity, NotificationId, UserId};

    use super::*;
    use crate::testing::{MockBackend, Op};

    fn identity(first: &str) -> Identity {
        Identity {
            id: UserId::new(),
            first_name: first.into(),
            last_name: "Test".into(),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn test_start_mounts_lists_for_signed_in_user() {
        let backend = Arc::new(MockBackend::new());
        let me = identity("Ana");
        let client = FitchaClient::with_backend(
            ClientConfig::default(),
            backend.clone(),
            IdentityProvider::signed_in(me),
        );

        client.start().await;

        assert_eq!(backend.count_calls(Op::Rpc, RPC_USER_CONVERSATIONS), 1);
        assert_eq!(backend.count_calls(Op::Select, TABLE_NOTIFICATIONS), 1);
        assert!(!client.containers().conversations.snapshot().loading);
        client.shutdown();
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let backend = Arc::new(MockBackend::new());
        let me = identity("Ana");
        backend.respond(
            Op::Select,
            TABLE_NOTIFICATIONS,
            json!([{
                "id": NotificationId::new(),
                "user_id": me.id,
                "type": "new_game_request",
                "message": "Hi",
                "read_at": null,
                "created_at": "2024-05-01T10:00:00Z"
            }]),
        );
        let client = FitchaClient::with_backend(
            ClientConfig::default(),
            backend.clone(),
            IdentityProvider::signed_in(me),
        );
        client.start().await;
        assert_eq!(client.containers().notifications.snapshot().data.notifications.len(), 1);

        let mut events = client.events().subscribe();
        client.handle_auth(AuthEvent::SignedOut, None).await;

        assert!(client.containers().notifications.snapshot().data.notifications.is_empty());
        assert!(client.context().registry.active_keys().is_empty());
        let mut saw_identity_change = false;
        while let Ok(event) = events.try_recv() {
            if event == (ClientEvent::IdentityChanged { user_id: None }) {
                saw_identity_change = true;
            }
        }
        assert!(saw_identity_change);
        client.shutdown();
    }

    #[tokio::test]
    async fn test_same_user_sign_in_is_not_a_change() {
        let backend = Arc::new(MockBackend::new());
        let me = identity("Ana");
        let client = FitchaClient::with_backend(
            ClientConfig::default(),
            backend.clone(),
            IdentityProvider::signed_in(me.clone()),
        );
        client.start().await;

        client.handle_auth(AuthEvent::SignedIn(me), None).await;
        assert_eq!(backend.count_calls(Op::Rpc, RPC_USER_CONVERSATIONS), 1);
        client.shutdown();
    }

    #[tokio::test]
    async fn test_topics_without_realtime() {
        let client = FitchaClient::with_backend(
            ClientConfig::default(),
            Arc::new(MockBackend::new()),
            IdentityProvider::new(),
        );
        assert!(matches!(
            client.realtime_topics().await,
            Err(NetError::ChannelClosed)
        ));
    }
}
