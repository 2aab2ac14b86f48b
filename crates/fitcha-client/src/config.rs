//! Client configuration loaded from environment variables.
//!
//! Everything except the service URL and anon key has a default, so a
//! local development stack only needs those two.

use std::time::Duration;

use fitcha_shared::constants::{
    COURT_SUGGESTION_LIMIT, HEARTBEAT_SECS, NOTIFICATION_PAGE_SIZE, REQUEST_TIMEOUT_SECS,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the hosted backend.
    /// Env: `FITCHA_URL`
    /// Default: `http://localhost:54321`
    pub url: String,

    /// Public anon key sent as `apikey` on every request.
    /// Env: `FITCHA_ANON_KEY`
    pub anon_key: String,

    /// Access token of an already signed-in user.
    /// Env: `FITCHA_ACCESS_TOKEN`
    /// Default: none (anonymous).
    pub access_token: Option<String>,

    /// Realtime heartbeat interval.
    /// Env: `FITCHA_HEARTBEAT_SECS`
    /// Default: 25 seconds.
    pub heartbeat: Duration,

    /// HTTP request timeout.
    /// Env: `FITCHA_REQUEST_TIMEOUT_SECS`
    /// Default: 15 seconds.
    pub request_timeout: Duration,

    /// Number of notifications fetched per snapshot.
    /// Env: `FITCHA_NOTIFICATION_LIMIT`
    /// Default: `20`
    pub notification_limit: u32,

    /// Number of ranked courts fetched when a session enters court selection.
    /// Env: `FITCHA_COURT_SUGGESTION_LIMIT`
    /// Default: `10`
    pub court_suggestion_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            access_token: None,
            heartbeat: Duration::from_secs(HEARTBEAT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            notification_limit: NOTIFICATION_PAGE_SIZE,
            court_suggestion_limit: COURT_SUGGESTION_LIMIT,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("FITCHA_URL") {
            config.url = url;
        }

        if let Some(key) = lookup("FITCHA_ANON_KEY") {
            config.anon_key = key;
        }

        if let Some(token) = lookup("FITCHA_ACCESS_TOKEN") {
            if !token.is_empty() {
                config.access_token = Some(token);
            }
        }

        if let Some(secs) = parse_positive(&lookup, "FITCHA_HEARTBEAT_SECS") {
            config.heartbeat = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive(&lookup, "FITCHA_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse_positive(&lookup, "FITCHA_NOTIFICATION_LIMIT") {
            config.notification_limit = n as u32;
        }

        if let Some(n) = parse_positive(&lookup, "FITCHA_COURT_SUGGESTION_LIMIT") {
            config.court_suggestion_limit = n as u32;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let value = lookup(name)?;
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 && n <= u32::MAX as u64 => Some(n),
        _ => {
            tracing::warn!(variable = name, value = %value, "Invalid value, using default");
            None
        }
    }
}
