use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use fitcha_shared::protocol::{ChangeEvent, ChannelKey};
use fitcha_shared::session::{
    CourtSuggestion, GameSession, SessionChatMessage, SessionMessageType, SessionRole,
    SessionStatus,
};
use fitcha_shared::types::{MessageId, SessionId};
use fitcha_shared::{RemoteError, SendError, ValidationError};

use super::session_machine::{plan, SessionAction, Transition};
use super::{ClientContext, Snapshot};
use crate::events::{emit_event, ClientEvent};
use crate::lock;
use crate::subscriptions::{PushHandler, SubscriptionHandle};
use crate::thread::{Applied, Thread};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionRoomView {
    pub session: Option<GameSession>,
    pub role: Option<SessionRole>,
    pub suggestions: Vec<CourtSuggestion>,
    pub suggestions_loading: bool,
    pub messages: Vec<SessionChatMessage>,
    pub draft: String,
    pub sending: bool,
    /// A status change is being written.
    pub acting: bool,
}

/// One game session: its row, court suggestions and chat. Kept current
/// from two channels, session row updates and chat inserts.
#[derive(Clone)]
pub struct SessionRoom {
    shared: Arc<RoomShared>,
}

struct RoomShared {
    ctx: ClientContext,
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    session_id: Option<SessionId>,
    epoch: u64,
    session: Option<GameSession>,
    suggestions: Vec<CourtSuggestion>,
    suggestions_loading: bool,
    chat: Thread<SessionChatMessage>,
    acting: bool,
    loading: bool,
    error: Option<String>,
    updates_live: bool,
    messages_live: bool,
    subscriptions: Vec<SubscriptionHandle>,
}

impl SessionRoom {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(RoomShared {
                ctx,
                state: Mutex::new(RoomState::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<SessionRoomView> {
        let viewer = self.shared.ctx.viewer();
        let st = lock(&self.shared.state);
        let role = match (&st.session, viewer) {
            (Some(session), Some(viewer)) => session.role_of(&viewer),
            _ => None,
        };
        Snapshot {
            data: SessionRoomView {
                session: st.session.clone(),
                role,
                suggestions: st.suggestions.clone(),
                suggestions_loading: st.suggestions_loading,
                messages: st.chat.messages().to_vec(),
                draft: st.chat.draft().to_string(),
                sending: st.chat.is_sending(),
                acting: st.acting,
            },
            loading: st.loading,
            error: st.error.clone(),
            live: st.updates_live && st.messages_live,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.shared.state).session_id
    }

    pub fn set_draft(&self, draft: &str) {
        lock(&self.shared.state).chat.set_draft(draft);
    }

    /// Switch to `session_id`, releasing both channels of the previous one.
    pub async fn open(&self, session_id: Option<SessionId>) {
        let (epoch, previous) = {
            let mut st = lock(&self.shared.state);
            let previous = std::mem::take(&mut st.subscriptions);
            let epoch = st.epoch + 1;
            *st = RoomState {
                session_id,
                epoch,
                loading: session_id.is_some(),
                ..RoomState::default()
            };
            (st.epoch, previous)
        };
        drop(previous);
        self.shared.changed(session_id);

        let Some(session_id) = session_id else {
            return;
        };

        let mut handles = Vec::with_capacity(2);
        for stream in [RoomStream::Updates, RoomStream::Messages] {
            let handler = Arc::new(RoomPush {
                target: Arc::downgrade(&self.shared),
                epoch,
                session_id,
                stream,
            });
            let handle = self
                .shared
                .ctx
                .registry
                .subscribe(stream.key(session_id), handler)
                .await;
            handles.push(handle);
        }
        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!(session = %session_id, "Session room switched while subscribing");
                drop(st);
                drop(handles);
                return;
            }
            st.subscriptions = handles;
        }

        self.shared.load(epoch, session_id).await;
    }

    pub fn close(&self) {
        let previous = {
            let mut st = lock(&self.shared.state);
            let previous = std::mem::take(&mut st.subscriptions);
            let epoch = st.epoch + 1;
            *st = RoomState {
                epoch,
                ..RoomState::default()
            };
            previous
        };
        drop(previous);
        self.shared.changed(None);
    }

    pub async fn refetch(&self) {
        let current = self.session_id();
        self.open(current).await;
    }

    pub async fn accept(&self) -> Result<Transition<GameSession>, RemoteError> {
        self.act(SessionAction::Accept).await
    }

    pub async fn decline(&self) -> Result<Transition<GameSession>, RemoteError> {
        self.act(SessionAction::Decline).await
    }

    pub async fn cancel(&self) -> Result<Transition<GameSession>, RemoteError> {
        self.act(SessionAction::Cancel).await
    }

    pub async fn select_court(
        &self,
        court: CourtSuggestion,
    ) -> Result<Transition<GameSession>, RemoteError> {
        self.act(SessionAction::SelectCourt(court)).await
    }

    /// Apply `action` if the viewer's role and the current status allow
    /// it. Disallowed actions (and actions while another one is being
    /// written) are ignored without any network call.
    pub async fn act(&self, action: SessionAction) -> Result<Transition<GameSession>, RemoteError> {
        let viewer = self.shared.ctx.gateway.identity().require()?;

        let (session_id, epoch, update) = {
            let mut st = lock(&self.shared.state);
            let Some(session) = st.session.as_ref() else {
                return Ok(Transition::Ignored);
            };
            if st.acting {
                debug!(session = %session.id, "Action already in flight, ignored");
                return Ok(Transition::Ignored);
            }
            let Some(update) = plan(session, &viewer.id, &action) else {
                debug!(session = %session.id, status = %session.status, action = ?action, "Action not allowed, ignored");
                return Ok(Transition::Ignored);
            };
            let session_id = session.id;
            st.acting = true;
            (session_id, st.epoch, update)
        };
        self.shared.changed(Some(session_id));

        let result = self
            .shared
            .ctx
            .gateway
            .update_session(session_id, &update)
            .await;

        let outcome = {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!(session = %session_id, "Session update completed after switch, discarded");
                return result.map(Transition::Applied);
            }
            st.acting = false;
            result.map(|row| {
                let merged = match st.session.take() {
                    Some(mut session) => {
                        session.merge_row(row);
                        session
                    }
                    None => row,
                };
                st.session = Some(merged.clone());
                let needs_courts = merged.status == SessionStatus::CourtSelection
                    && st.suggestions.is_empty();
                (merged, needs_courts)
            })
        };
        self.shared.changed(Some(session_id));
        emit_event(&self.shared.ctx.events, ClientEvent::SessionsChanged);

        let (session, needs_courts) = outcome?;
        info!(session = %session_id, status = %session.status, "Session updated");
        if needs_courts {
            self.shared.load_suggestions(epoch, session_id).await;
        }
        Ok(Transition::Applied(session))
    }

    /// Optimistically append a chat message, write it, then confirm or
    /// roll back.
    pub async fn send(&self, body: &str) -> Result<SessionChatMessage, SendError> {
        let viewer = self
            .shared
            .ctx
            .gateway
            .identity()
            .current()
            .ok_or(ValidationError::SignedOut)?;

        let (session_id, epoch, local, body) = {
            let mut st = lock(&self.shared.state);
            let session_id = st.session_id.ok_or(ValidationError::NoActiveThread)?;
            let body = st.chat.validate(body)?;
            let local = MessageId::Local(self.shared.ctx.local_ids.next_id());
            st.chat.begin_send(SessionChatMessage {
                id: local,
                session_id,
                sender_id: viewer.id,
                message: body.clone(),
                message_type: SessionMessageType::Text,
                metadata: json!({}),
                created_at: Utc::now(),
                sender_name: Some(viewer.display_name()),
                sender_avatar: viewer.avatar_url.clone(),
                sender: None,
            });
            (session_id, st.epoch, local, body)
        };
        self.shared.changed(Some(session_id));

        let result = self
            .shared
            .ctx
            .gateway
            .send_session_message(session_id, &body, SessionMessageType::Text, json!({}))
            .await;

        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!(session = %session_id, "Send completed after room switch, discarded");
                return result.map_err(SendError::from);
            }
            match &result {
                Ok(message) => {
                    st.chat.confirm(local, message.clone());
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Session message failed, rolled back");
                    st.chat.rollback(local, body);
                }
            }
        }
        self.shared.changed(Some(session_id));
        result.map_err(SendError::from)
    }
}

impl RoomShared {
    fn changed(&self, session_id: Option<SessionId>) {
        emit_event(&self.ctx.events, ClientEvent::SessionChanged { session_id });
    }

    fn is_current(&self, epoch: u64) -> bool {
        lock(&self.state).epoch == epoch
    }

    async fn load(&self, epoch: u64, session_id: SessionId) {
        let (session, messages) = tokio::join!(
            self.ctx.gateway.session(session_id),
            self.ctx.gateway.session_messages(session_id),
        );
        let needs_courts = {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                debug!(session = %session_id, "Stale session fetch discarded");
                return;
            }
            st.loading = false;
            match session {
                Ok(session) => st.session = Some(session),
                Err(e) => st.error = Some(e.message),
            }
            match messages {
                Ok(messages) => st.chat.replace_all(messages),
                Err(e) => {
                    st.error.get_or_insert(e.message);
                }
            }
            st.session
                .as_ref()
                .is_some_and(|s| s.status == SessionStatus::CourtSelection)
                && st.suggestions.is_empty()
        };
        self.changed(Some(session_id));

        if needs_courts {
            self.load_suggestions(epoch, session_id).await;
        }
    }

    async fn load_suggestions(&self, epoch: u64, session_id: SessionId) {
        {
            let mut st = lock(&self.state);
            if st.epoch != epoch || st.suggestions_loading {
                return;
            }
            st.suggestions_loading = true;
        }
        self.changed(Some(session_id));

        let result = self.ctx.gateway.suggest_courts(session_id).await;
        {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                return;
            }
            st.suggestions_loading = false;
            match result {
                Ok(courts) => {
                    debug!(session = %session_id, count = courts.len(), "Court suggestions loaded");
                    st.suggestions = courts;
                }
                Err(e) => st.error = Some(e.message),
            }
        }
        self.changed(Some(session_id));
    }

    async fn apply_session_row(&self, epoch: u64, row: GameSession) {
        let session_id = row.id;
        let needs_courts = {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                return;
            }
            // Pushed rows are authoritative, whatever order they arrive in.
            let merged = match st.session.take() {
                Some(mut session) => {
                    session.merge_row(row);
                    session
                }
                None => row,
            };
            let needs_courts =
                merged.status == SessionStatus::CourtSelection && st.suggestions.is_empty();
            st.session = Some(merged);
            needs_courts
        };
        self.changed(Some(session_id));
        emit_event(&self.ctx.events, ClientEvent::SessionsChanged);

        if needs_courts {
            self.load_suggestions(epoch, session_id).await;
        }
    }

    fn apply_chat_row(&self, epoch: u64, row: SessionChatMessage) {
        let Some(viewer) = self.ctx.viewer() else {
            return;
        };
        let session_id = row.session_id;
        let message_id = row.id;
        let applied = {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                return;
            }
            st.chat.apply_remote(row, &viewer)
        };
        if applied == Applied::Appended {
            self.changed(Some(session_id));
        } else {
            debug!(session = %session_id, message = %message_id, outcome = ?applied, "Pushed session message not appended");
        }
    }

    fn set_live(&self, epoch: u64, stream: RoomStream, live: bool) {
        let session_id = {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                return;
            }
            let flag = match stream {
                RoomStream::Updates => &mut st.updates_live,
                RoomStream::Messages => &mut st.messages_live,
            };
            if *flag == live {
                return;
            }
            *flag = live;
            st.session_id
        };
        if session_id.is_some() {
            self.changed(session_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomStream {
    Updates,
    Messages,
}

impl RoomStream {
    fn key(self, session_id: SessionId) -> ChannelKey {
        match self {
            RoomStream::Updates => ChannelKey::SessionUpdates(session_id),
            RoomStream::Messages => ChannelKey::SessionMessages(session_id),
        }
    }
}

struct RoomPush {
    target: Weak<RoomShared>,
    epoch: u64,
    session_id: SessionId,
    stream: RoomStream,
}

#[async_trait]
impl PushHandler for RoomPush {
    async fn on_change(&self, event: ChangeEvent) {
        let Some(shared) = self.target.upgrade() else {
            return;
        };
        if !shared.is_current(self.epoch) {
            debug!(session = %self.session_id, "Push for a closed session ignored");
            return;
        }
        match self.stream {
            RoomStream::Updates => match event.decode_record::<GameSession>() {
                Ok(row) => shared.apply_session_row(self.epoch, row).await,
                Err(e) => warn!(session = %self.session_id, error = %e, "Undecodable session row"),
            },
            RoomStream::Messages => match event.decode_record::<SessionChatMessage>() {
                Ok(row) => shared.apply_chat_row(self.epoch, row),
                Err(e) => warn!(session = %self.session_id, error = %e, "Undecodable session message"),
            },
        }
    }

    fn on_joined(&self) {
        if let Some(shared) = self.target.upgrade() {
            shared.set_live(self.epoch, self.stream, true);
        }
    }

    fn on_degraded(&self, reason: &str) {
        warn!(session = %self.session_id, stream = ?self.stream, reason = %reason, "Session channel is not live");
        if let Some(shared) = self.target.upgrade() {
            shared.set_live(self.epoch, self.stream, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use fitcha_net::RealtimeNotification;
    use fitcha_shared::constants::{
        RPC_SUGGEST_COURTS, TABLE_GAME_SESSIONS, TABLE_SESSION_CHAT_MESSAGES,
    };
    use fitcha_shared::protocol::ChangeKind;
    use fitcha_shared::types::{CourtId, UserId};

    use super::*;
    use crate::containers::test_support::harness;
    use crate::testing::Op;

    fn session_row(id: SessionId, status: &str, initiator: UserId, invitee: UserId) -> Value {
        json!({
            "id": id,
            "status": status,
            "initiator_id": initiator,
            "invitee_id": invitee,
            "sport": "Padel",
            "proposed_datetime": "2024-06-01T18:00:00Z",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z"
        })
    }

    fn courts() -> Value {
        json!([{
            "court_id": CourtId::new(),
            "court_name": "Club Central",
            "hourly_price": 30.0,
            "distance_km": 2.1,
            "availability_score": 0.8
        }])
    }

    fn change(key: ChannelKey, table: &str, record: Value) -> RealtimeNotification {
        RealtimeNotification::Change {
            key,
            event: ChangeEvent {
                table: table.into(),
                kind: ChangeKind::Update,
                record,
                old_record: None,
                commit_timestamp: None,
            },
        }
    }

    #[tokio::test]
    async fn test_invitee_accepts_and_suggestions_load() {
        let h = harness();
        let id = SessionId::new();
        let initiator = UserId::new();
        h.backend
            .respond(
                Op::Select,
                TABLE_GAME_SESSIONS,
                session_row(id, "pending_acceptance", initiator, h.me.id),
            )
            .respond(
                Op::Update,
                TABLE_GAME_SESSIONS,
                json!([session_row(id, "court_selection", initiator, h.me.id)]),
            )
            .respond(Op::Rpc, RPC_SUGGEST_COURTS, courts());

        let room = SessionRoom::new(h.ctx.clone());
        room.open(Some(id)).await;
        assert_eq!(room.snapshot().data.role, Some(SessionRole::Invitee));

        let outcome = room.accept().await.unwrap();
        assert!(outcome.is_applied());
        let view = room.snapshot().data;
        assert_eq!(
            view.session.map(|s| s.status),
            Some(SessionStatus::CourtSelection)
        );
        assert_eq!(view.suggestions.len(), 1);
        assert_eq!(h.backend.count_calls(Op::Rpc, RPC_SUGGEST_COURTS), 1);

        // Accepting again is a no-op: no second write.
        assert_eq!(room.accept().await.unwrap(), Transition::Ignored);
        assert_eq!(h.backend.count_calls(Op::Update, TABLE_GAME_SESSIONS), 1);
    }

    #[tokio::test]
    async fn test_initiator_cannot_accept() {
        let h = harness();
        let id = SessionId::new();
        h.backend.respond(
            Op::Select,
            TABLE_GAME_SESSIONS,
            session_row(id, "pending_acceptance", h.me.id, UserId::new()),
        );
        let room = SessionRoom::new(h.ctx.clone());
        room.open(Some(id)).await;

        assert_eq!(room.accept().await.unwrap(), Transition::Ignored);
        assert_eq!(h.backend.count_calls(Op::Update, TABLE_GAME_SESSIONS), 0);
    }

    #[tokio::test]
    async fn test_pushed_status_overwrites_and_loads_courts() {
        let h = harness();
        let id = SessionId::new();
        let invitee = UserId::new();
        h.backend
            .respond(
                Op::Select,
                TABLE_GAME_SESSIONS,
                session_row(id, "pending_acceptance", h.me.id, invitee),
            )
            .respond(Op::Rpc, RPC_SUGGEST_COURTS, courts());
        let room = SessionRoom::new(h.ctx.clone());
        room.open(Some(id)).await;

        h.ctx
            .registry
            .dispatch(change(
                ChannelKey::SessionUpdates(id),
                TABLE_GAME_SESSIONS,
                session_row(id, "court_selection", h.me.id, invitee),
            ))
            .await;
        let view = room.snapshot().data;
        assert_eq!(
            view.session.as_ref().map(|s| s.status),
            Some(SessionStatus::CourtSelection)
        );
        assert_eq!(view.suggestions.len(), 1);

        // An older status arriving late still wins.
        h.ctx
            .registry
            .dispatch(change(
                ChannelKey::SessionUpdates(id),
                TABLE_GAME_SESSIONS,
                session_row(id, "pending_acceptance", h.me.id, invitee),
            ))
            .await;
        assert_eq!(
            room.snapshot().data.session.map(|s| s.status),
            Some(SessionStatus::PendingAcceptance)
        );
    }

    #[tokio::test]
    async fn test_chat_send_and_foreign_push() {
        let h = harness();
        let id = SessionId::new();
        let other = UserId::new();
        h.backend.respond(
            Op::Insert,
            TABLE_SESSION_CHAT_MESSAGES,
            json!({
                "id": 10,
                "session_id": id,
                "sender_id": h.me.id,
                "message": "court 2?",
                "message_type": "text",
                "metadata": {},
                "created_at": "2024-05-01T10:00:00Z"
            }),
        );
        let room = SessionRoom::new(h.ctx.clone());
        room.open(Some(id)).await;

        let sent = room.send("court 2?").await.unwrap();
        assert_eq!(sent.id, MessageId::Server(10));

        let key = ChannelKey::SessionMessages(id);
        let echo = json!({
            "id": 10, "session_id": id, "sender_id": h.me.id,
            "message": "court 2?", "created_at": "2024-05-01T10:00:00Z"
        });
        h.ctx
            .registry
            .dispatch(change(key, TABLE_SESSION_CHAT_MESSAGES, echo))
            .await;
        let reply = json!({
            "id": 11, "session_id": id, "sender_id": other,
            "message": "ok", "created_at": "2024-05-01T10:00:30Z"
        });
        h.ctx
            .registry
            .dispatch(change(key, TABLE_SESSION_CHAT_MESSAGES, reply))
            .await;

        let messages = room.snapshot().data.messages;
        let ids: Vec<_> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, [MessageId::Server(10), MessageId::Server(11)]);
    }

    #[tokio::test]
    async fn test_echo_before_insert_returns_leaves_one_entry() {
        let h = harness();
        let id = SessionId::new();
        let key = ChannelKey::SessionMessages(id);
        let insert = h.backend.defer(Op::Insert, TABLE_SESSION_CHAT_MESSAGES);
        let room = SessionRoom::new(h.ctx.clone());
        room.open(Some(id)).await;

        let sending = {
            let room = room.clone();
            tokio::spawn(async move { room.send("court 2?").await })
        };
        while !room.snapshot().data.sending {
            tokio::task::yield_now().await;
        }

        let row = json!({
            "id": 10, "session_id": id, "sender_id": h.me.id,
            "message": "court 2?", "message_type": "text", "metadata": {},
            "created_at": "2024-05-01T10:00:00Z"
        });
        h.ctx
            .registry
            .dispatch(change(key, TABLE_SESSION_CHAT_MESSAGES, row.clone()))
            .await;
        let messages = room.snapshot().data.messages;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].id.is_local());

        insert.send(Ok(row)).unwrap();
        sending.await.unwrap().unwrap();

        let ids: Vec<_> = room.snapshot().data.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, [MessageId::Server(10)]);
    }

    #[tokio::test]
    async fn test_clearing_room_announces_change() {
        let h = harness();
        let id = SessionId::new();
        let room = SessionRoom::new(h.ctx.clone());
        room.open(Some(id)).await;

        let mut events = h.ctx.events.subscribe();
        room.open(None).await;
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::SessionChanged { session_id: None }
        );
        assert_eq!(room.session_id(), None);

        room.open(Some(id)).await;
        while events.try_recv().is_ok() {}
        room.close();
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::SessionChanged { session_id: None }
        );
    }

    #[tokio::test]
    async fn test_switch_releases_both_channels() {
        let h = harness();
        let a = SessionId::new();
        let b = SessionId::new();
        let room = SessionRoom::new(h.ctx.clone());
        room.open(Some(a)).await;
        room.open(Some(b)).await;

        assert!(!h.ctx.registry.is_active(&ChannelKey::SessionUpdates(a)));
        assert!(!h.ctx.registry.is_active(&ChannelKey::SessionMessages(a)));
        assert!(h.ctx.registry.is_active(&ChannelKey::SessionUpdates(b)));
        assert!(h.ctx.registry.is_active(&ChannelKey::SessionMessages(b)));
    }
}
