use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use fitcha_shared::protocol::ChannelKey;
use fitcha_shared::social::{GameRequest, GameRequestStatus};
use fitcha_shared::types::{GameRequestId, UserId};
use fitcha_shared::RemoteError;

use super::{ClientContext, ListSource, ReloadOnPush, Snapshot};
use crate::events::{emit_event, ClientEvent};
use crate::lock;
use crate::subscriptions::SubscriptionHandle;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameRequestsData {
    pub received: Vec<GameRequest>,
    pub sent: Vec<GameRequest>,
    /// Received requests still awaiting an answer.
    pub pending_count: i64,
}

/// Game requests sent and received by the viewer.
#[derive(Clone)]
pub struct GameRequests {
    shared: Arc<Shared>,
}

struct Shared {
    ctx: ClientContext,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    snapshot: Snapshot<GameRequestsData>,
    epoch: u64,
    subscription: Option<SubscriptionHandle>,
}

impl GameRequests {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<GameRequestsData> {
        lock(&self.shared.state).snapshot.clone()
    }

    pub fn pending_count(&self) -> i64 {
        lock(&self.shared.state).snapshot.data.pending_count
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
            emit_event(&self.shared.ctx.events, ClientEvent::GameRequestsChanged);
            return;
        };

        let key = ChannelKey::MyGameRequests(viewer);
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

    pub async fn create(
        &self,
        receiver: UserId,
        message: Option<String>,
        proposed_datetime: Option<DateTime<Utc>>,
    ) -> Result<GameRequest, RemoteError> {
        let request = self
            .shared
            .ctx
            .gateway
            .create_game_request(receiver, message, proposed_datetime)
            .await?;
        info!(request = %request.id, receiver = %receiver, "Game request sent");
        self.shared.reload().await;
        Ok(request)
    }

    /// Accept or decline a received request.
    pub async fn respond(
        &self,
        request_id: GameRequestId,
        status: GameRequestStatus,
    ) -> Result<GameRequest, RemoteError> {
        let request = self
            .shared
            .ctx
            .gateway
            .update_game_request(request_id, status)
            .await?;
        self.shared.reload().await;
        Ok(request)
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
        emit_event(&self.ctx.events, ClientEvent::GameRequestsChanged);
    }

    async fn reload(&self) {
        let epoch = self.epoch();
        let gateway = &self.ctx.gateway;
        let (received, sent, pending) = tokio::join!(
            gateway.received_game_requests(),
            gateway.sent_game_requests(),
            gateway.pending_game_request_count(),
        );
        {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                debug!("Stale game requests fetch discarded");
                return;
            }
            let snapshot = &mut st.snapshot;
            let mut error: Option<String> = None;
            match received {
                Ok(list) => snapshot.data.received = list,
                Err(e) => {
                    error.get_or_insert(e.message);
                }
            }
            match sent {
                Ok(list) => snapshot.data.sent = list,
                Err(e) => {
                    error.get_or_insert(e.message);
                }
            }
            match pending {
                Ok(count) => snapshot.data.pending_count = count.max(0),
                Err(e) => {
                    error.get_or_insert(e.message);
                }
            }
            snapshot.loading = false;
            snapshot.error = error;
        }
        emit_event(&self.ctx.events, ClientEvent::GameRequestsChanged);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use fitcha_shared::constants::TABLE_GAME_REQUESTS;

    use super::*;
    use crate::containers::test_support::harness;
    use crate::testing::Op;

    #[tokio::test]
    async fn test_respond_refetches_everything() {
        let h = harness();
        let id = GameRequestId::new();
        let sender = UserId::new();
        let request = json!({
            "id": id,
            "sender_id": sender,
            "receiver_id": h.me.id,
            "status": "pending",
            "created_at": "2024-05-01T10:00:00Z",
            "sender_profile": { "first_name": "Bob", "last_name": "Martin" }
        });
        h.backend
            .respond(Op::Select, TABLE_GAME_REQUESTS, json!([request]))
            .respond(Op::Count, TABLE_GAME_REQUESTS, json!(1))
            .respond(
                Op::Update,
                TABLE_GAME_REQUESTS,
                json!([{
                    "id": id,
                    "sender_id": sender,
                    "receiver_id": h.me.id,
                    "status": "accepted",
                    "created_at": "2024-05-01T10:00:00Z"
                }]),
            );

        let requests = GameRequests::new(h.ctx.clone());
        requests.mount().await;
        assert_eq!(requests.pending_count(), 1);
        // Received and sent share the scripted table reply.
        assert_eq!(requests.snapshot().data.received.len(), 1);

        let updated = requests
            .respond(id, GameRequestStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(updated.status, GameRequestStatus::Accepted);
        assert_eq!(h.backend.count_calls(Op::Count, TABLE_GAME_REQUESTS), 2);
        assert_eq!(
            h.backend.calls_to(Op::Update, TABLE_GAME_REQUESTS)[0].body,
            json!({ "status": "accepted" })
        );
    }

    #[tokio::test]
    async fn test_signed_out_mount_is_empty() {
        let mut h = harness();
        h.ctx = crate::containers::ClientContext::new(
            crate::gateway::Gateway::new(
                h.backend.clone(),
                crate::identity::IdentityProvider::new(),
            ),
            h.ctx.registry.clone(),
            h.ctx.events.clone(),
        );
        let requests = GameRequests::new(h.ctx.clone());
        requests.mount().await;

        let snapshot = requests.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.data.pending_count, 0);
        assert!(h.backend.calls().is_empty());
    }
}
