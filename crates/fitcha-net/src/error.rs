use thiserror::Error;

use fitcha_shared::RemoteError;

/// Errors produced by the network layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level HTTP failure (DNS, TLS, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A single-row query matched nothing.
    #[error("Record not found")]
    NotFound,

    /// The realtime task has stopped and no longer accepts commands.
    #[error("Realtime command channel closed")]
    ChannelClosed,

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;

impl From<NetError> for RemoteError {
    fn from(err: NetError) -> Self {
        RemoteError::new(err.to_string())
    }
}
