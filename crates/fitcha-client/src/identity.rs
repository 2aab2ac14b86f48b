//! The signed-in identity, shared read-only with every container.
//!
//! The auth collaborator feeds [`AuthEvent`]s in; everything downstream
//! reads the current value or watches for changes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use fitcha_shared::types::{Identity, UserId};
use fitcha_shared::RemoteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityState {
    pub identity: Option<Identity>,
    /// True until the initial resolution finishes.
    pub loading: bool,
}

impl Default for IdentityState {
    fn default() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }
}

/// Transitions reported by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

#[derive(Clone)]
pub struct IdentityProvider {
    tx: Arc<watch::Sender<IdentityState>>,
}

impl IdentityProvider {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(IdentityState::default());
        Self { tx: Arc::new(tx) }
    }

    /// A provider that is already resolved to `identity`.
    pub fn signed_in(identity: Identity) -> Self {
        let provider = Self::new();
        provider.tx.send_replace(IdentityState {
            identity: Some(identity),
            loading: false,
        });
        provider
    }

    /// Run the initial lookup and leave the loading state, whatever it
    /// returns.
    pub async fn resolve_initial<F>(&self, lookup: F)
    where
        F: Future<Output = Option<Identity>>,
    {
        let identity = lookup.await;
        info!(user = ?identity.as_ref().map(|i| i.id), "Initial identity resolved");
        self.tx.send_replace(IdentityState {
            identity,
            loading: false,
        });
    }

    /// Apply an auth transition. Returns whether the signed-in user changed.
    pub fn apply(&self, event: AuthEvent) -> bool {
        let next = match event {
            AuthEvent::SignedIn(identity) => Some(identity),
            AuthEvent::SignedOut => None,
        };
        let mut user_changed = false;
        self.tx.send_if_modified(|state| {
            let was_loading = state.loading;
            state.loading = false;
            user_changed = state.identity.as_ref().map(|i| i.id) != next.as_ref().map(|i| i.id);
            if user_changed {
                info!(user = ?next.as_ref().map(|i| i.id), "Identity changed");
            }
            let modified = user_changed || was_loading || state.identity != next;
            state.identity = next;
            modified
        });
        user_changed
    }

    pub fn current(&self) -> Option<Identity> {
        self.tx.borrow().identity.clone()
    }

    pub fn current_id(&self) -> Option<UserId> {
        self.tx.borrow().identity.as_ref().map(|i| i.id)
    }

    /// The current identity, or the "not authenticated" remote error.
    pub fn require(&self) -> Result<Identity, RemoteError> {
        self.current().ok_or_else(RemoteError::not_authenticated)
    }

    pub fn is_loading(&self) -> bool {
        self.tx.borrow().loading
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.tx.subscribe()
    }
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(first: &str) -> Identity {
        Identity {
            id: UserId::new(),
            first_name: first.into(),
            last_name: "Test".into(),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn test_loading_until_resolved() {
        let provider = IdentityProvider::new();
        assert!(provider.is_loading());
        assert_eq!(provider.require(), Err(RemoteError::not_authenticated()));

        let ana = identity("Ana");
        provider.resolve_initial(async { Some(ana.clone()) }).await;
        assert!(!provider.is_loading());
        assert_eq!(provider.current_id(), Some(ana.id));
    }

    #[test]
    fn test_apply_reports_user_switch_only() {
        let ana = identity("Ana");
        let provider = IdentityProvider::signed_in(ana.clone());
        let mut rx = provider.subscribe();

        let mut renamed = ana.clone();
        renamed.first_name = "Ana Maria".into();
        assert!(!provider.apply(AuthEvent::SignedIn(renamed)));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(provider.apply(AuthEvent::SignedOut));
        assert!(provider.current().is_none());
        assert!(!provider.apply(AuthEvent::SignedOut));
    }
}
