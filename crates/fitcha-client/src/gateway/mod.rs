//! Remote data gateway.
//!
//! Every remote read and write the containers perform goes through
//! [`Gateway`]. Each operation returns `Result<T, RemoteError>`: transport,
//! status and decode failures are normalized to a displayable message and
//! nothing is thrown past this boundary. No local state is kept here.

mod messaging;
mod notifications;
mod search;
mod sessions;
mod social;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use fitcha_net::{Backend, NetError};
use fitcha_shared::constants::{COURT_SUGGESTION_LIMIT, NOTIFICATION_PAGE_SIZE};
use fitcha_shared::types::Identity;
use fitcha_shared::RemoteError;

use crate::identity::IdentityProvider;

/// Result of a gateway call.
pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn Backend>,
    identity: IdentityProvider,
    notification_limit: u32,
    court_suggestion_limit: u32,
}

impl Gateway {
    pub fn new(backend: Arc<dyn Backend>, identity: IdentityProvider) -> Self {
        Self {
            backend,
            identity,
            notification_limit: NOTIFICATION_PAGE_SIZE,
            court_suggestion_limit: COURT_SUGGESTION_LIMIT,
        }
    }

    pub fn with_limits(mut self, notification_limit: u32, court_suggestion_limit: u32) -> Self {
        self.notification_limit = notification_limit;
        self.court_suggestion_limit = court_suggestion_limit;
        self
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    pub fn court_suggestion_limit(&self) -> u32 {
        self.court_suggestion_limit
    }

    fn me(&self) -> RemoteResult<Identity> {
        self.identity.require()
    }

    /// Run `call` and normalize its failure, falling back to `fallback`
    /// when the failure carries no message of its own.
    async fn guard<T, F>(&self, fallback: &'static str, call: F) -> RemoteResult<T>
    where
        F: Future<Output = Result<T, NetError>>,
    {
        call.await.map_err(|err| {
            let error = normalize(err, fallback);
            warn!(operation = fallback, error = %error, "Remote call failed");
            error
        })
    }
}

fn normalize(err: NetError, fallback: &str) -> RemoteError {
    match err {
        NetError::Status { message, .. } if !message.trim().is_empty() => RemoteError::new(message),
        NetError::Http(e) => RemoteError::new(e.to_string()),
        _ => RemoteError::new(fallback),
    }
}

/// Decode a list result; a null body is an empty list.
fn decode_rows<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, NetError> {
    match value {
        Value::Null => Ok(Vec::new()),
        value => Ok(serde_json::from_value(value)?),
    }
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, NetError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(NetError::from))
        .collect()
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, NetError> {
    Ok(serde_json::from_value(value)?)
}

/// Scalar count returned by a remote procedure; null counts as zero.
fn decode_count(value: Value) -> Result<i64, NetError> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| NetError::Unexpected(format!("count out of range: {n}"))),
        other => Err(NetError::Unexpected(format!("expected a count, got {other}"))),
    }
}
