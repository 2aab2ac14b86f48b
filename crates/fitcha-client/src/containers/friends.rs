use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use fitcha_shared::social::{Friend, Friendship, FriendshipStatus, PendingFriendRequest, Relationship};
use fitcha_shared::types::{FriendshipId, UserId};
use fitcha_shared::RemoteError;

use super::{ClientContext, Snapshot, Transition};
use crate::events::{emit_event, ClientEvent};
use crate::lock;

// ---------------------------------------------------------------------------
// Relationship with one viewed user
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FriendshipView {
    pub user_id: Option<UserId>,
    pub relationship: Relationship,
    pub friendship: Option<Friendship>,
    /// A change is being written.
    pub busy: bool,
}

impl Default for FriendshipView {
    fn default() -> Self {
        Self {
            user_id: None,
            relationship: Relationship::Loading,
            friendship: None,
            busy: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FriendOp {
    Send,
    Delete,
    Update(FriendshipStatus),
}

/// Drives the friend button on another user's profile. Every change is
/// shown immediately and reverted if the write fails.
#[derive(Clone)]
pub struct FriendshipTracker {
    shared: Arc<TrackerShared>,
}

struct TrackerShared {
    ctx: ClientContext,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    snapshot: Snapshot<FriendshipView>,
    epoch: u64,
}

impl FriendshipTracker {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                ctx,
                state: Mutex::new(TrackerState::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<FriendshipView> {
        lock(&self.shared.state).snapshot.clone()
    }

    pub fn relationship(&self) -> Relationship {
        lock(&self.shared.state).snapshot.data.relationship
    }

    /// Track the relationship with `user`.
    pub async fn open(&self, user: UserId) {
        let epoch = {
            let mut st = lock(&self.shared.state);
            st.epoch += 1;
            st.snapshot = Snapshot {
                data: FriendshipView {
                    user_id: Some(user),
                    ..FriendshipView::default()
                },
                loading: true,
                ..Snapshot::default()
            };
            st.epoch
        };
        self.load(epoch, user).await;
    }

    /// Stop tracking and forget the last relationship.
    pub fn close(&self) {
        let mut st = lock(&self.shared.state);
        st.epoch += 1;
        st.snapshot = Snapshot::default();
    }

    pub async fn refetch(&self) {
        let (epoch, user) = {
            let st = lock(&self.shared.state);
            (st.epoch, st.snapshot.data.user_id)
        };
        if let Some(user) = user {
            self.load(epoch, user).await;
        }
    }

    async fn load(&self, epoch: u64, user: UserId) {
        let Some(viewer) = self.shared.ctx.viewer() else {
            let mut st = lock(&self.shared.state);
            if st.epoch == epoch {
                st.snapshot.loading = false;
                st.snapshot.error = Some(RemoteError::not_authenticated().message);
            }
            return;
        };
        let result = self.shared.ctx.gateway.friendship_status(user).await;
        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!(user = %user, "Stale friendship fetch discarded");
                return;
            }
            let snapshot = &mut st.snapshot;
            snapshot.loading = false;
            match result {
                Ok(friendship) => {
                    snapshot.data.relationship =
                        Relationship::from_friendship(friendship.as_ref(), &viewer);
                    snapshot.data.friendship = friendship;
                    snapshot.error = None;
                }
                Err(e) => {
                    snapshot.data.relationship = Relationship::AddFriend;
                    snapshot.error = Some(e.message);
                }
            }
        }
        emit_event(&self.shared.ctx.events, ClientEvent::FriendshipChanged { user_id: user });
    }

    pub async fn send_request(&self) -> Result<Transition<Relationship>, RemoteError> {
        self.mutate(Relationship::AddFriend, Relationship::RequestSent, FriendOp::Send)
            .await
    }

    pub async fn cancel_request(&self) -> Result<Transition<Relationship>, RemoteError> {
        self.mutate(Relationship::RequestSent, Relationship::AddFriend, FriendOp::Delete)
            .await
    }

    pub async fn accept(&self) -> Result<Transition<Relationship>, RemoteError> {
        self.mutate(
            Relationship::RequestReceived,
            Relationship::Friends,
            FriendOp::Update(FriendshipStatus::Accepted),
        )
        .await
    }

    pub async fn decline(&self) -> Result<Transition<Relationship>, RemoteError> {
        self.mutate(
            Relationship::RequestReceived,
            Relationship::AddFriend,
            FriendOp::Update(FriendshipStatus::Declined),
        )
        .await
    }

    pub async fn unfriend(&self) -> Result<Transition<Relationship>, RemoteError> {
        self.mutate(Relationship::Friends, Relationship::AddFriend, FriendOp::Delete)
            .await
    }

    async fn mutate(
        &self,
        expected: Relationship,
        optimistic: Relationship,
        op: FriendOp,
    ) -> Result<Transition<Relationship>, RemoteError> {
        let viewer = self.shared.ctx.gateway.identity().require()?;

        let (user, epoch, previous, friendship_id) = {
            let mut st = lock(&self.shared.state);
            let view = &mut st.snapshot.data;
            let Some(user) = view.user_id else {
                return Ok(Transition::Ignored);
            };
            if view.busy || view.relationship != expected {
                debug!(user = %user, relationship = ?view.relationship, op = ?op, "Friend action not allowed, ignored");
                return Ok(Transition::Ignored);
            }
            let friendship_id = view.friendship.as_ref().map(|f| f.friendship_id);
            if friendship_id.is_none() && !matches!(op, FriendOp::Send) {
                return Ok(Transition::Ignored);
            }
            let previous = (view.relationship, view.friendship.clone());
            view.relationship = optimistic;
            view.busy = true;
            (user, st.epoch, previous, friendship_id)
        };
        emit_event(&self.shared.ctx.events, ClientEvent::FriendshipChanged { user_id: user });

        let gateway = &self.shared.ctx.gateway;
        let result = match (op, friendship_id) {
            (FriendOp::Send, _) => gateway.send_friend_request(user).await.map(Some),
            (FriendOp::Delete, Some(id)) => gateway.delete_friendship(id).await.map(|()| None),
            (FriendOp::Update(status), Some(id)) => {
                gateway.update_friendship(id, status).await.map(Some)
            }
            (_, None) => Ok(None),
        };

        let settled = {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!(user = %user, "Friend action completed after switch, discarded");
                return result.map(|_| Transition::Applied(optimistic));
            }
            let snapshot = &mut st.snapshot;
            snapshot.data.busy = false;
            match result {
                Ok(friendship) => {
                    snapshot.data.relationship =
                        Relationship::from_friendship(friendship.as_ref(), &viewer.id);
                    snapshot.data.friendship = friendship;
                    snapshot.error = None;
                    Ok(snapshot.data.relationship)
                }
                Err(e) => {
                    warn!(user = %user, op = ?op, error = %e, "Friend action failed, reverted");
                    (snapshot.data.relationship, snapshot.data.friendship) = previous;
                    snapshot.error = Some(e.message.clone());
                    Err(e)
                }
            }
        };
        emit_event(&self.shared.ctx.events, ClientEvent::FriendshipChanged { user_id: user });

        let relationship = settled?;
        info!(user = %user, relationship = ?relationship, "Relationship changed");
        if matches!(op, FriendOp::Update(_)) {
            emit_event(&self.shared.ctx.events, ClientEvent::FriendRequestsChanged);
        }
        if expected == Relationship::Friends || relationship == Relationship::Friends {
            emit_event(&self.shared.ctx.events, ClientEvent::FriendsChanged);
        }
        Ok(Transition::Applied(relationship))
    }
}

// ---------------------------------------------------------------------------
// Incoming friend requests
// ---------------------------------------------------------------------------

/// Friend requests awaiting the viewer's answer.
#[derive(Clone)]
pub struct FriendRequests {
    shared: Arc<RequestsShared>,
}

struct RequestsShared {
    ctx: ClientContext,
    state: Mutex<RequestsState>,
}

#[derive(Default)]
struct RequestsState {
    snapshot: Snapshot<Vec<PendingFriendRequest>>,
    epoch: u64,
}

impl FriendRequests {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(RequestsShared {
                ctx,
                state: Mutex::new(RequestsState::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<Vec<PendingFriendRequest>> {
        lock(&self.shared.state).snapshot.clone()
    }

    pub async fn mount(&self) {
        let signed_in = self.shared.ctx.viewer().is_some();
        let epoch = {
            let mut st = lock(&self.shared.state);
            st.epoch += 1;
            if !signed_in {
                st.snapshot = Snapshot::default();
            }
            st.snapshot.loading = signed_in;
            st.epoch
        };
        if !signed_in {
            emit_event(&self.shared.ctx.events, ClientEvent::FriendRequestsChanged);
            return;
        }
        let result = self.shared.ctx.gateway.pending_friend_requests().await;
        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!("Stale friend requests fetch discarded");
                return;
            }
            st.snapshot.loading = false;
            match result {
                Ok(requests) => {
                    st.snapshot.data = requests;
                    st.snapshot.error = None;
                }
                Err(e) => st.snapshot.error = Some(e.message),
            }
        }
        emit_event(&self.shared.ctx.events, ClientEvent::FriendRequestsChanged);
    }

    pub fn unmount(&self) {
        let mut st = lock(&self.shared.state);
        st.epoch += 1;
        st.snapshot.loading = false;
    }

    pub async fn refetch(&self) {
        self.mount().await;
    }

    pub async fn accept(&self, friendship_id: FriendshipId) -> Result<(), RemoteError> {
        self.answer(friendship_id, FriendshipStatus::Accepted).await?;
        emit_event(&self.shared.ctx.events, ClientEvent::FriendsChanged);
        Ok(())
    }

    pub async fn decline(&self, friendship_id: FriendshipId) -> Result<(), RemoteError> {
        self.answer(friendship_id, FriendshipStatus::Declined).await
    }

    /// Write the answer, then drop the request from the list.
    async fn answer(
        &self,
        friendship_id: FriendshipId,
        status: FriendshipStatus,
    ) -> Result<(), RemoteError> {
        self.shared
            .ctx
            .gateway
            .update_friendship(friendship_id, status)
            .await?;
        lock(&self.shared.state)
            .snapshot
            .data
            .retain(|request| request.friendship_id != friendship_id);
        emit_event(&self.shared.ctx.events, ClientEvent::FriendRequestsChanged);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Friends list
// ---------------------------------------------------------------------------

/// Friends of a user (the viewer when none is given).
#[derive(Clone)]
pub struct Friends {
    shared: Arc<FriendsShared>,
}

struct FriendsShared {
    ctx: ClientContext,
    state: Mutex<FriendsState>,
}

#[derive(Default)]
struct FriendsState {
    snapshot: Snapshot<Vec<Friend>>,
    user: Option<UserId>,
    epoch: u64,
}

impl Friends {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(FriendsShared {
                ctx,
                state: Mutex::new(FriendsState::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<Vec<Friend>> {
        lock(&self.shared.state).snapshot.clone()
    }

    pub async fn mount(&self, user: Option<UserId>) {
        let signed_in = self.shared.ctx.viewer().is_some();
        let epoch = {
            let mut st = lock(&self.shared.state);
            st.epoch += 1;
            if st.user != user || !signed_in {
                st.snapshot = Snapshot::default();
            }
            st.user = user;
            st.snapshot.loading = signed_in;
            st.epoch
        };
        if !signed_in {
            emit_event(&self.shared.ctx.events, ClientEvent::FriendsChanged);
            return;
        }
        let result = self.shared.ctx.gateway.friends(user).await;
        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!("Stale friends fetch discarded");
                return;
            }
            st.snapshot.loading = false;
            match result {
                Ok(friends) => {
                    st.snapshot.data = friends;
                    st.snapshot.error = None;
                }
                Err(e) => st.snapshot.error = Some(e.message),
            }
        }
        emit_event(&self.shared.ctx.events, ClientEvent::FriendsChanged);
    }

    pub fn unmount(&self) {
        let mut st = lock(&self.shared.state);
        st.epoch += 1;
        st.snapshot.loading = false;
    }

    pub async fn refetch(&self) {
        let user = lock(&self.shared.state).user;
        self.mount(user).await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use fitcha_shared::constants::{
        RPC_FRIENDSHIP_STATUS, RPC_PENDING_FRIEND_REQUESTS, RPC_USER_FRIENDS, TABLE_FRIENDSHIPS,
    };

    use super::*;
    use crate::containers::test_support::harness;
    use crate::testing::Op;

    fn friendship(id: FriendshipId, status: &str, requester: UserId, receiver: UserId) -> Value {
        json!({
            "id": id,
            "status": status,
            "requester_id": requester,
            "receiver_id": receiver,
            "created_at": "2024-05-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_send_request_applies_server_row() {
        let h = harness();
        let bob = UserId::new();
        h.backend.respond(
            Op::Insert,
            TABLE_FRIENDSHIPS,
            friendship(FriendshipId::new(), "pending", h.me.id, bob),
        );
        let tracker = FriendshipTracker::new(h.ctx.clone());
        tracker.open(bob).await;
        assert_eq!(tracker.relationship(), Relationship::AddFriend);

        let outcome = tracker.send_request().await.unwrap();
        assert_eq!(outcome, Transition::Applied(Relationship::RequestSent));
        assert!(!tracker.snapshot().data.busy);

        // Sending twice is not possible from RequestSent.
        assert_eq!(tracker.send_request().await.unwrap(), Transition::Ignored);
        assert_eq!(h.backend.count_calls(Op::Insert, TABLE_FRIENDSHIPS), 1);
    }

    #[tokio::test]
    async fn test_failed_unfriend_rolls_back() {
        let h = harness();
        let bob = UserId::new();
        h.backend
            .respond(
                Op::Rpc,
                RPC_FRIENDSHIP_STATUS,
                json!([{
                    "friendship_id": FriendshipId::new(),
                    "status": "accepted",
                    "requester_id": bob,
                    "receiver_id": h.me.id,
                    "created_at": "2024-05-01T10:00:00Z"
                }]),
            )
            .fail(Op::Delete, TABLE_FRIENDSHIPS, "network error");
        let tracker = FriendshipTracker::new(h.ctx.clone());
        tracker.open(bob).await;
        assert_eq!(tracker.relationship(), Relationship::Friends);

        let err = tracker.unfriend().await.unwrap_err();
        assert_eq!(err.message, "network error");
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.data.relationship, Relationship::Friends);
        assert!(snapshot.data.friendship.is_some());
        assert_eq!(snapshot.error.as_deref(), Some("network error"));
    }

    #[tokio::test]
    async fn test_accepting_request_removes_row() {
        let h = harness();
        let (first, second) = (FriendshipId::new(), FriendshipId::new());
        let bob = UserId::new();
        let pending = |id: FriendshipId| {
            json!({
                "friendship_id": id,
                "requester_id": bob,
                "requester_name": "Bob Martin",
                "created_at": "2024-05-01T10:00:00Z"
            })
        };
        h.backend
            .respond(
                Op::Rpc,
                RPC_PENDING_FRIEND_REQUESTS,
                json!([pending(first), pending(second)]),
            )
            .respond(
                Op::Update,
                TABLE_FRIENDSHIPS,
                json!([friendship(first, "accepted", bob, h.me.id)]),
            );
        let requests = FriendRequests::new(h.ctx.clone());
        requests.mount().await;
        assert_eq!(requests.snapshot().data.len(), 2);

        requests.accept(first).await.unwrap();
        let left = requests.snapshot().data;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].friendship_id, second);
    }

    #[tokio::test]
    async fn test_friends_of_other_user() {
        let h = harness();
        let bob = UserId::new();
        h.backend.respond(
            Op::Rpc,
            RPC_USER_FRIENDS,
            json!([{
                "friend_id": UserId::new(),
                "friend_name": "Carla Diaz",
                "friendship_date": "2024-05-01T10:00:00Z"
            }]),
        );
        let friends = Friends::new(h.ctx.clone());
        friends.mount(Some(bob)).await;

        assert_eq!(friends.snapshot().data.len(), 1);
        let call = &h.backend.calls_to(Op::Rpc, RPC_USER_FRIENDS)[0];
        assert_eq!(call.body["p_user_id"], json!(bob));
    }
}
