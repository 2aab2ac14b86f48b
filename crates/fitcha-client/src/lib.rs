//! Realtime reconciliation layer of the Fitcha client.
//!
//! Containers load snapshots through the [`gateway::Gateway`], stay current
//! from realtime pushes routed by the [`subscriptions::SubscriptionRegistry`],
//! and announce changes on the [`events::EventBus`].

pub mod badges;
pub mod bridge;
pub mod config;
pub mod containers;
pub mod events;
pub mod gateway;
pub mod identity;
pub mod state;
pub mod subscriptions;
pub mod thread;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use events::{ClientEvent, EventBus};
pub use identity::{AuthEvent, IdentityProvider};
pub use state::{Containers, FitchaClient};

/// Lock a container mutex. A panic while holding it leaves plain data
/// behind, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fitcha_client_lib=debug,fitcha_net=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
