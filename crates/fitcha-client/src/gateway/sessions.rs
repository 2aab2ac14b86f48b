use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use fitcha_net::Query;
use fitcha_shared::constants::{
    RPC_SUGGEST_COURTS, RPC_USER_ACTIVE_SESSIONS, TABLE_GAME_SESSIONS, TABLE_SESSION_CHAT_MESSAGES,
};
use fitcha_shared::session::{
    CourtSuggestion, GameSession, NewGameSession, NewSessionMessage, SessionChatMessage,
    SessionMessageType, SessionUpdate,
};
use fitcha_shared::types::{SessionId, UserId};

use super::{decode, decode_all, decode_rows, Gateway, RemoteResult};

const SESSION_MESSAGE_COLUMNS: &str =
    "*, sender:profiles!session_chat_messages_sender_id_fkey(first_name, last_name, avatar_url)";

impl Gateway {
    pub async fn create_session(
        &self,
        invitee: UserId,
        sport: &str,
        proposed_datetime: DateTime<Utc>,
    ) -> RemoteResult<GameSession> {
        let me = self.me()?;
        self.guard("Failed to create game session", async {
            let row = serde_json::to_value(NewGameSession {
                initiator_id: me.id,
                invitee_id: invitee,
                sport: sport.to_string(),
                proposed_datetime,
            })?;
            let session: GameSession =
                decode(self.backend.insert(TABLE_GAME_SESSIONS, row, "*").await?)?;
            debug!(session = %session.id, invitee = %invitee, "Session created");
            Ok(session)
        })
        .await
    }

    pub async fn active_sessions(&self) -> RemoteResult<Vec<GameSession>> {
        self.guard("Failed to fetch active sessions", async {
            decode_rows(self.backend.rpc(RPC_USER_ACTIVE_SESSIONS, json!({})).await?)
        })
        .await
    }

    pub async fn session(&self, session_id: SessionId) -> RemoteResult<GameSession> {
        self.guard("Failed to fetch session", async {
            let query = Query::table(TABLE_GAME_SESSIONS).eq("id", session_id);
            decode(self.backend.select_one(&query).await?)
        })
        .await
    }

    pub async fn update_session(
        &self,
        session_id: SessionId,
        update: &SessionUpdate,
    ) -> RemoteResult<GameSession> {
        self.guard("Failed to update session", async {
            let query = Query::table(TABLE_GAME_SESSIONS).eq("id", session_id);
            let patch = serde_json::to_value(update)?;
            let rows = self.backend.update(&query, patch).await?;
            let row = rows.into_iter().next().ok_or(fitcha_net::NetError::NotFound)?;
            decode(row)
        })
        .await
    }

    /// Courts ranked by distance and availability for the session's sport
    /// and proposed time.
    pub async fn suggest_courts(&self, session_id: SessionId) -> RemoteResult<Vec<CourtSuggestion>> {
        self.guard("Failed to suggest courts", async {
            let params = json!({
                "p_session_id": session_id,
                "p_limit": self.court_suggestion_limit,
            });
            decode_rows(self.backend.rpc(RPC_SUGGEST_COURTS, params).await?)
        })
        .await
    }

    pub async fn session_messages(
        &self,
        session_id: SessionId,
    ) -> RemoteResult<Vec<SessionChatMessage>> {
        self.guard("Failed to fetch session messages", async {
            let query = Query::table(TABLE_SESSION_CHAT_MESSAGES)
                .select(SESSION_MESSAGE_COLUMNS)
                .eq("session_id", session_id)
                .order("created_at", true);
            decode_all(self.backend.select(&query).await?)
        })
        .await
    }

    pub async fn send_session_message(
        &self,
        session_id: SessionId,
        message: &str,
        message_type: SessionMessageType,
        metadata: Value,
    ) -> RemoteResult<SessionChatMessage> {
        let me = self.me()?;
        self.guard("Failed to send message", async {
            let row = serde_json::to_value(NewSessionMessage {
                session_id,
                sender_id: me.id,
                message: message.to_string(),
                message_type,
                metadata,
            })?;
            let inserted = self
                .backend
                .insert(TABLE_SESSION_CHAT_MESSAGES, row, SESSION_MESSAGE_COLUMNS)
                .await?;
            decode(inserted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fitcha_shared::session::{PaymentOption, SessionStatus};
    use fitcha_shared::types::{CourtId, Identity};

    use super::*;
    use crate::identity::IdentityProvider;
    use crate::testing::{MockBackend, Op};

    fn signed_in(backend: &Arc<MockBackend>) -> Gateway {
        let identity = Identity {
            id: UserId::new(),
            first_name: "Ana".into(),
            last_name: "Lopez".into(),
            avatar_url: None,
        };
        Gateway::new(backend.clone(), IdentityProvider::signed_in(identity))
    }

    #[tokio::test]
    async fn test_update_session_sends_only_set_fields() {
        let backend = Arc::new(MockBackend::new());
        let session = SessionId::new();
        let court = CourtId::new();
        backend.respond(
            Op::Update,
            TABLE_GAME_SESSIONS,
            json!([{
                "id": session,
                "status": "pending_payment",
                "initiator_id": UserId::new(),
                "invitee_id": UserId::new(),
                "sport": "Tennis",
                "proposed_datetime": "2024-06-01T18:00:00Z",
                "selected_court_id": court,
                "total_cost": 30.0,
                "payment_option": "split_50_50",
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-02T10:00:00Z"
            }]),
        );
        let gateway = signed_in(&backend);

        let update = SessionUpdate {
            status: Some(SessionStatus::PendingPayment),
            selected_court_id: Some(court),
            total_cost: Some(30.0),
            payment_option: Some(PaymentOption::Split5050),
            ..Default::default()
        };
        let updated = gateway.update_session(session, &update).await.unwrap();
        assert_eq!(updated.status, SessionStatus::PendingPayment);

        let call = &backend.calls_to(Op::Update, TABLE_GAME_SESSIONS)[0];
        assert_eq!(
            call.body,
            json!({
                "status": "pending_payment",
                "selected_court_id": court,
                "total_cost": 30.0,
                "payment_option": "split_50_50"
            })
        );
    }

    #[tokio::test]
    async fn test_update_matching_nothing_is_an_error() {
        let backend = Arc::new(MockBackend::new());
        let gateway = signed_in(&backend);
        let err = gateway
            .update_session(SessionId::new(), &SessionUpdate::status(SessionStatus::Cancelled))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Failed to update session");
    }

    #[tokio::test]
    async fn test_suggest_courts_uses_configured_limit() {
        let backend = Arc::new(MockBackend::new());
        let gateway = signed_in(&backend).with_limits(20, 5);
        let session = SessionId::new();

        let courts = gateway.suggest_courts(session).await.unwrap();
        assert!(courts.is_empty());

        let call = &backend.calls_to(Op::Rpc, RPC_SUGGEST_COURTS)[0];
        assert_eq!(call.body["p_limit"], 5);
        assert_eq!(call.body["p_session_id"], json!(session));
    }
}
