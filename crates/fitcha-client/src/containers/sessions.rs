use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;

use fitcha_shared::session::{GameSession, SessionUpdate};
use fitcha_shared::types::{SessionId, UserId};
use fitcha_shared::RemoteError;

use super::{ClientContext, Snapshot};
use crate::events::{emit_event, ClientEvent};
use crate::lock;

/// The viewer's active game sessions. No push channel; every mutation is
/// followed by a full re-fetch.
#[derive(Clone)]
pub struct SessionList {
    shared: Arc<Shared>,
}

struct Shared {
    ctx: ClientContext,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    snapshot: Snapshot<Vec<GameSession>>,
    epoch: u64,
}

impl SessionList {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot<Vec<GameSession>> {
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
        if signed_in {
            self.load(epoch).await;
        } else {
            emit_event(&self.shared.ctx.events, ClientEvent::SessionsChanged);
        }
    }

    pub fn unmount(&self) {
        let mut st = lock(&self.shared.state);
        st.epoch += 1;
        st.snapshot.loading = false;
    }

    pub async fn refetch(&self) {
        let epoch = lock(&self.shared.state).epoch;
        self.load(epoch).await;
    }

    pub async fn create(
        &self,
        invitee: UserId,
        sport: &str,
        proposed_datetime: DateTime<Utc>,
    ) -> Result<GameSession, RemoteError> {
        let session = self
            .shared
            .ctx
            .gateway
            .create_session(invitee, sport, proposed_datetime)
            .await?;
        self.refetch().await;
        Ok(session)
    }

    pub async fn update(
        &self,
        session_id: SessionId,
        update: &SessionUpdate,
    ) -> Result<GameSession, RemoteError> {
        let session = self
            .shared
            .ctx
            .gateway
            .update_session(session_id, update)
            .await?;
        self.refetch().await;
        Ok(session)
    }

    async fn load(&self, epoch: u64) {
        let result = self.shared.ctx.gateway.active_sessions().await;
        {
            let mut st = lock(&self.shared.state);
            if st.epoch != epoch {
                debug!("Stale session list fetch discarded");
                return;
            }
            st.snapshot.loading = false;
            match result {
                Ok(sessions) => {
                    st.snapshot.data = sessions;
                    st.snapshot.error = None;
                }
                Err(e) => st.snapshot.error = Some(e.message),
            }
        }
        emit_event(&self.shared.ctx.events, ClientEvent::SessionsChanged);
    }
}
