use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use fitcha_shared::messaging::{Conversation, Message, MessageRow};
use fitcha_shared::protocol::{ChangeEvent, ChannelKey};
use fitcha_shared::types::{ConversationId, MessageId, UserId};
use fitcha_shared::{SendError, ValidationError};

use super::{ClientContext, ListSource, ReloadOnPush, Snapshot};
use crate::events::{emit_event, ClientEvent};
use crate::lock;
use crate::subscriptions::{PushHandler, SubscriptionHandle};
use crate::thread::{Applied, Thread};

// ---------------------------------------------------------------------------
// Conversation list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationListData {
    pub conversations: Vec<Conversation>,
    pub unread_count: i64,
}

/// The viewer's conversations with their unread total. Any message insert
/// visible to the viewer triggers a full re-fetch.
#[derive(Clone)]
pub struct ConversationList {
    shared: Arc<ListShared>,
}

struct ListShared {
    ctx: ClientContext,
    state: Mutex<ListState>,
}

#[derive(Default)]
struct ListState {
    snapshot: Snapshot<ConversationListData>,
    epoch: u64,
    subscription: Option<SubscriptionHandle>,
}

impl ConversationList {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(ListShared {
                ctx,
                state: Mutex::new(ListState::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<ConversationListData> {
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
            st.snapshot.error = None;
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
            emit_event(&self.shared.ctx.events, ClientEvent::ConversationsChanged);
            return;
        };

        let key = ChannelKey::MyConversations(viewer);
        let handle = self
            .shared
            .ctx
            .registry
            .subscribe(key, ReloadOnPush::new(&self.shared, epoch, key))
            .await;
        let stale = {
            let mut st = lock(&self.shared.state);
            if st.epoch == epoch {
                st.subscription = Some(handle);
                None
            } else {
                Some(handle)
            }
        };
        if stale.is_some() {
            debug!("Conversation list unmounted while subscribing");
            return;
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

    /// Re-run the snapshot fetch and re-arm the subscription.
    pub async fn refetch(&self) {
        self.mount().await;
    }

    /// Send to a user, creating the conversation on first contact, then
    /// refresh the list.
    pub async fn send_to_user(
        &self,
        recipient: UserId,
        body: &str,
    ) -> Result<ConversationId, SendError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }
        let (conversation_id, _message) = self
            .shared
            .ctx
            .gateway
            .send_message_to_user(recipient, body)
            .await?;
        self.shared.reload().await;
        Ok(conversation_id)
    }
}

#[async_trait]
impl ListSource for ListShared {
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
        emit_event(&self.ctx.events, ClientEvent::ConversationsChanged);
    }

    async fn reload(&self) {
        let epoch = self.epoch();
        let (conversations, unread) = tokio::join!(
            self.ctx.gateway.user_conversations(),
            self.ctx.gateway.unread_conversation_count(),
        );
        {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                debug!("Stale conversation list fetch discarded");
                return;
            }
            let snapshot = &mut st.snapshot;
            snapshot.loading = false;
            snapshot.error = None;
            match conversations {
                Ok(list) => snapshot.data.conversations = list,
                Err(e) => snapshot.error = Some(e.message),
            }
            match unread {
                Ok(count) => snapshot.data.unread_count = count.max(0),
                Err(e) => {
                    snapshot.error.get_or_insert(e.message);
                }
            }
        }
        emit_event(&self.ctx.events, ClientEvent::ConversationsChanged);
    }
}

// ---------------------------------------------------------------------------
// Conversation thread
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThreadView {
    pub conversation_id: Option<ConversationId>,
    pub messages: Vec<Message>,
    pub draft: String,
    pub sending: bool,
}

/// The open conversation: its messages, compose draft and optimistic send.
#[derive(Clone)]
pub struct ConversationThread {
    shared: Arc<ThreadShared>,
}

struct ThreadShared {
    ctx: ClientContext,
    state: Mutex<ThreadState>,
}

#[derive(Default)]
struct ThreadState {
    conversation_id: Option<ConversationId>,
    epoch: u64,
    thread: Thread<Message>,
    loading: bool,
    error: Option<String>,
    live: bool,
    subscription: Option<SubscriptionHandle>,
}

impl ConversationThread {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(ThreadShared {
                ctx,
                state: Mutex::new(ThreadState::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<ThreadView> {
        let st = lock(&self.shared.state);
        Snapshot {
            data: ThreadView {
                conversation_id: st.conversation_id,
                messages: st.thread.messages().to_vec(),
                draft: st.thread.draft().to_string(),
                sending: st.thread.is_sending(),
            },
            loading: st.loading,
            error: st.error.clone(),
            live: st.live,
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        lock(&self.shared.state).conversation_id
    }

    pub fn set_draft(&self, draft: &str) {
        lock(&self.shared.state).thread.set_draft(draft);
    }

    /// Switch to `conversation_id` (or to nothing). The previous thread's
    /// subscription is released before anything is loaded for the new one.
    pub async fn open(&self, conversation_id: Option<ConversationId>) {
        let (epoch, previous) = {
            let mut st = lock(&self.shared.state);
            st.epoch += 1;
            st.conversation_id = conversation_id;
            st.thread.clear();
            st.error = None;
            st.live = false;
            st.loading = conversation_id.is_some();
            (st.epoch, st.subscription.take())
        };
        drop(previous);
        self.shared.changed(conversation_id);

        let Some(conversation_id) = conversation_id else {
            return;
        };

        let handler = Arc::new(ThreadPush {
            target: Arc::downgrade(&self.shared),
            epoch,
            conversation_id,
        });
        let handle = self
            .shared
            .ctx
            .registry
            .subscribe(ChannelKey::Conversation(conversation_id), handler)
            .await;
        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!(conversation = %conversation_id, "Thread switched while subscribing");
                drop(st);
                drop(handle);
                return;
            }
            st.subscription = Some(handle);
        }

        self.shared.load(epoch, conversation_id).await;
    }

    pub fn close(&self) {
        let subscription = {
            let mut st = lock(&self.shared.state);
            st.epoch += 1;
            st.conversation_id = None;
            st.thread.clear();
            st.loading = false;
            st.live = false;
            st.subscription.take()
        };
        drop(subscription);
        self.shared.changed(None);
    }

    pub async fn refetch(&self) {
        let current = self.conversation_id();
        self.open(current).await;
    }

    /// Optimistically append `body`, write it, then confirm or roll back.
    pub async fn send(&self, body: &str) -> Result<Message, SendError> {
        let viewer = self
            .shared
            .ctx
            .gateway
            .identity()
            .current()
            .ok_or(ValidationError::SignedOut)?;

        let (conversation_id, epoch, local, body) = {
            let mut st = lock(&self.shared.state);
            let conversation_id = st.conversation_id.ok_or(ValidationError::NoActiveThread)?;
            let body = st.thread.validate(body)?;
            let local = MessageId::Local(self.shared.ctx.local_ids.next_id());
            st.thread.begin_send(Message {
                message_id: local,
                sender_id: viewer.id,
                sender_name: viewer.display_name(),
                sender_avatar: viewer.avatar_url.clone(),
                content: body.clone(),
                created_at: Utc::now(),
                is_read: false,
            });
            (conversation_id, st.epoch, local, body)
        };
        self.shared.changed(Some(conversation_id));

        let result = self
            .shared
            .ctx
            .gateway
            .send_message(conversation_id, &body)
            .await;

        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!(conversation = %conversation_id, "Send completed after thread switch, discarded");
                return result.map_err(SendError::from);
            }
            match &result {
                Ok(message) => {
                    st.thread.confirm(local, message.clone());
                }
                Err(e) => {
                    warn!(conversation = %conversation_id, error = %e, "Send failed, rolled back");
                    st.thread.rollback(local, body);
                }
            }
        }
        self.shared.changed(Some(conversation_id));
        result.map_err(SendError::from)
    }
}

impl ThreadShared {
    fn changed(&self, conversation_id: Option<ConversationId>) {
        emit_event(&self.ctx.events, ClientEvent::ThreadChanged { conversation_id });
    }

    async fn load(&self, epoch: u64, conversation_id: ConversationId) {
        let result = self.ctx.gateway.conversation_messages(conversation_id).await;
        {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                debug!(conversation = %conversation_id, "Stale thread fetch discarded");
                return;
            }
            st.loading = false;
            match result {
                Ok(messages) => st.thread.replace_all(messages),
                Err(e) => st.error = Some(e.message),
            }
        }
        self.changed(Some(conversation_id));

        // Opening a thread reads what the other party sent.
        if self.ctx.gateway.mark_messages_read(conversation_id).await.is_ok() {
            emit_event(&self.ctx.events, ClientEvent::ConversationsChanged);
        }
    }

    fn set_live(&self, epoch: u64, live: bool) {
        let conversation_id = {
            let mut st = lock(&self.state);
            if st.epoch != epoch || st.live == live {
                return;
            }
            st.live = live;
            st.conversation_id
        };
        self.changed(conversation_id);
    }
}

struct ThreadPush {
    target: Weak<ThreadShared>,
    epoch: u64,
    conversation_id: ConversationId,
}

#[async_trait]
impl PushHandler for ThreadPush {
    async fn on_change(&self, event: ChangeEvent) {
        let Some(shared) = self.target.upgrade() else {
            return;
        };
        let row: MessageRow = match event.decode_record() {
            Ok(row) => row,
            Err(e) => {
                warn!(conversation = %self.conversation_id, error = %e, "Undecodable message row");
                return;
            }
        };
        let Some(viewer) = shared.ctx.viewer() else {
            return;
        };
        if row.sender_id == viewer {
            debug!(conversation = %self.conversation_id, message = row.id, "Own message echoed back, dropped");
            return;
        }
        if lock(&shared.state).epoch != self.epoch {
            debug!(conversation = %self.conversation_id, "Push for a closed thread ignored");
            return;
        }

        // Change-feed rows carry no sender profile; the thread listing does.
        let server_id = MessageId::Server(row.id);
        let message = match shared.ctx.gateway.conversation_messages(self.conversation_id).await {
            Ok(messages) => messages
                .into_iter()
                .find(|m| m.message_id == server_id)
                .unwrap_or_else(|| Message::from(row)),
            Err(_) => Message::from(row),
        };

        let applied = {
            let mut st = lock(&shared.state);
            if st.epoch != self.epoch {
                return;
            }
            st.thread.apply_remote(message, &viewer)
        };
        if applied != Applied::Appended {
            debug!(conversation = %self.conversation_id, message = %server_id, outcome = ?applied, "Pushed message not appended");
            return;
        }
        shared.changed(Some(self.conversation_id));

        if shared
            .ctx
            .gateway
            .mark_messages_read(self.conversation_id)
            .await
            .is_ok()
        {
            emit_event(&shared.ctx.events, ClientEvent::ConversationsChanged);
        }
    }

    fn on_joined(&self) {
        if let Some(shared) = self.target.upgrade() {
            shared.set_live(self.epoch, true);
        }
    }

    fn on_degraded(&self, reason: &str) {
        warn!(conversation = %self.conversation_id, reason = %reason, "Thread is not live");
        if let Some(shared) = self.target.upgrade() {
            shared.set_live(self.epoch, false);
        }
    }
}
