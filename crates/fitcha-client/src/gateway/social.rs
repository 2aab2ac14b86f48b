use chrono::{DateTime, Utc};
use serde_json::json;

use fitcha_net::{NetError, Query};
use fitcha_shared::constants::{
    RPC_FRIENDSHIP_STATUS, RPC_PENDING_FRIEND_REQUESTS, RPC_USER_FRIENDS, TABLE_FRIENDSHIPS,
    TABLE_GAME_REQUESTS,
};
use fitcha_shared::social::{
    Friend, Friendship, FriendshipStatus, GameRequest, GameRequestStatus, NewGameRequest,
    PendingFriendRequest,
};
use fitcha_shared::types::{FriendshipId, GameRequestId, UserId};

use super::{decode, decode_all, decode_rows, Gateway, RemoteResult};

const GAME_REQUEST_COLUMNS: &str = "*, \
    sender_profile:profiles!fk_sender(first_name, last_name, avatar_url, location), \
    receiver_profile:profiles!fk_receiver(first_name, last_name, avatar_url, location)";
const RECEIVED_REQUEST_COLUMNS: &str =
    "*, sender_profile:profiles!fk_sender(first_name, last_name, avatar_url, location)";
const SENT_REQUEST_COLUMNS: &str =
    "*, receiver_profile:profiles!fk_receiver(first_name, last_name, avatar_url, location)";

impl Gateway {
    // -----------------------------------------------------------------------
    // Friendships
    // -----------------------------------------------------------------------

    /// The friendship row between the viewer and `other`, if any.
    pub async fn friendship_status(&self, other: UserId) -> RemoteResult<Option<Friendship>> {
        let me = self.me()?;
        self.guard("Failed to get friendship status", async {
            let params = json!({ "user1_id": me.id, "user2_id": other });
            let rows: Vec<Friendship> =
                decode_rows(self.backend.rpc(RPC_FRIENDSHIP_STATUS, params).await?)?;
            Ok(rows.into_iter().next())
        })
        .await
    }

    pub async fn send_friend_request(&self, receiver: UserId) -> RemoteResult<Friendship> {
        let me = self.me()?;
        self.guard("Failed to send friend request", async {
            let row = json!({
                "requester_id": me.id,
                "receiver_id": receiver,
                "status": FriendshipStatus::Pending,
            });
            decode(self.backend.insert(TABLE_FRIENDSHIPS, row, "*").await?)
        })
        .await
    }

    pub async fn update_friendship(
        &self,
        friendship_id: FriendshipId,
        status: FriendshipStatus,
    ) -> RemoteResult<Friendship> {
        self.guard("Failed to update friendship", async {
            let query = Query::table(TABLE_FRIENDSHIPS).eq("id", friendship_id);
            let rows = self
                .backend
                .update(&query, json!({ "status": status }))
                .await?;
            decode(rows.into_iter().next().ok_or(NetError::NotFound)?)
        })
        .await
    }

    /// Cancel a sent request or unfriend; both remove the row.
    pub async fn delete_friendship(&self, friendship_id: FriendshipId) -> RemoteResult<()> {
        self.guard("Failed to remove friendship", async {
            let query = Query::table(TABLE_FRIENDSHIPS).eq("id", friendship_id);
            self.backend.delete(&query).await
        })
        .await
    }

    /// Friends of `user`, or of the viewer when `None`.
    pub async fn friends(&self, user: Option<UserId>) -> RemoteResult<Vec<Friend>> {
        self.guard("Failed to get user friends", async {
            let params = json!({ "p_user_id": user });
            decode_rows(self.backend.rpc(RPC_USER_FRIENDS, params).await?)
        })
        .await
    }

    pub async fn pending_friend_requests(&self) -> RemoteResult<Vec<PendingFriendRequest>> {
        self.guard("Failed to get pending friend requests", async {
            decode_rows(self.backend.rpc(RPC_PENDING_FRIEND_REQUESTS, json!({})).await?)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Game requests
    // -----------------------------------------------------------------------

    pub async fn create_game_request(
        &self,
        receiver: UserId,
        message: Option<String>,
        proposed_datetime: Option<DateTime<Utc>>,
    ) -> RemoteResult<GameRequest> {
        let me = self.me()?;
        self.guard("Failed to create game request", async {
            let row = serde_json::to_value(NewGameRequest {
                sender_id: me.id,
                receiver_id: receiver,
                message,
                proposed_datetime,
            })?;
            decode(
                self.backend
                    .insert(TABLE_GAME_REQUESTS, row, GAME_REQUEST_COLUMNS)
                    .await?,
            )
        })
        .await
    }

    pub async fn received_game_requests(&self) -> RemoteResult<Vec<GameRequest>> {
        let me = self.me()?;
        self.guard("Failed to fetch received requests", async {
            let query = Query::table(TABLE_GAME_REQUESTS)
                .select(RECEIVED_REQUEST_COLUMNS)
                .eq("receiver_id", me.id)
                .order("created_at", false);
            decode_all(self.backend.select(&query).await?)
        })
        .await
    }

    pub async fn sent_game_requests(&self) -> RemoteResult<Vec<GameRequest>> {
        let me = self.me()?;
        self.guard("Failed to fetch sent requests", async {
            let query = Query::table(TABLE_GAME_REQUESTS)
                .select(SENT_REQUEST_COLUMNS)
                .eq("sender_id", me.id)
                .order("created_at", false);
            decode_all(self.backend.select(&query).await?)
        })
        .await
    }

    pub async fn update_game_request(
        &self,
        request_id: GameRequestId,
        status: GameRequestStatus,
    ) -> RemoteResult<GameRequest> {
        self.guard("Failed to update request status", async {
            let query = Query::table(TABLE_GAME_REQUESTS)
                .select(GAME_REQUEST_COLUMNS)
                .eq("id", request_id);
            let rows = self
                .backend
                .update(&query, json!({ "status": status }))
                .await?;
            decode(rows.into_iter().next().ok_or(NetError::NotFound)?)
        })
        .await
    }

    /// Received requests still awaiting an answer.
    pub async fn pending_game_request_count(&self) -> RemoteResult<i64> {
        let me = self.me()?;
        self.guard("Failed to fetch pending requests count", async {
            let query = Query::table(TABLE_GAME_REQUESTS)
                .eq("receiver_id", me.id)
                .eq("status", "pending");
            Ok(self.backend.count(&query).await? as i64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fitcha_shared::types::Identity;

    use super::*;
    use crate::identity::IdentityProvider;
    use crate::testing::{MockBackend, Op};

    fn setup() -> (Arc<MockBackend>, Gateway, UserId) {
        let backend = Arc::new(MockBackend::new());
        let me = UserId::new();
        let identity = Identity {
            id: me,
            first_name: "Ana".into(),
            last_name: "Lopez".into(),
            avatar_url: None,
        };
        let gateway = Gateway::new(backend.clone(), IdentityProvider::signed_in(identity));
        (backend, gateway, me)
    }

    #[tokio::test]
    async fn test_friendship_status_takes_first_row() {
        let (backend, gateway, me) = setup();
        let other = UserId::new();
        backend.respond(
            Op::Rpc,
            RPC_FRIENDSHIP_STATUS,
            json!([{
                "friendship_id": FriendshipId::new(),
                "status": "pending",
                "requester_id": other,
                "receiver_id": me,
                "created_at": "2024-05-01T10:00:00Z"
            }]),
        );

        let friendship = gateway.friendship_status(other).await.unwrap().unwrap();
        assert_eq!(friendship.requester_id, other);

        backend.respond(Op::Rpc, RPC_FRIENDSHIP_STATUS, json!([]));
        assert!(gateway.friendship_status(other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_count_filters_receiver_and_status() {
        let (backend, gateway, me) = setup();
        backend.respond(Op::Count, TABLE_GAME_REQUESTS, json!(4));

        assert_eq!(gateway.pending_game_request_count().await.unwrap(), 4);
        let call = &backend.calls_to(Op::Count, TABLE_GAME_REQUESTS)[0];
        assert_eq!(
            call.filters,
            vec![
                ("receiver_id".to_string(), format!("eq.{me}")),
                ("status".to_string(), "eq.pending".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_failure_is_normalized() {
        let (backend, gateway, _) = setup();
        backend.fail(Op::Delete, TABLE_FRIENDSHIPS, "");
        let err = gateway
            .delete_friendship(FriendshipId::new())
            .await
            .unwrap_err();
        assert_eq!(err.message, "Failed to remove friendship");
    }
}
