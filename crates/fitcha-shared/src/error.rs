use thiserror::Error;

/// A failed remote call, normalized to a displayable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn not_authenticated() -> Self {
        Self::new("User not authenticated")
    }
}

/// Input rejected before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyBody,

    #[error("No active thread")]
    NoActiveThread,

    #[error("A message is already being sent")]
    SendInFlight,

    #[error("Not signed in")]
    SignedOut,
}

/// Outcome of a failed optimistic send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_displays_message_only() {
        let err = RemoteError::new("network error");
        assert_eq!(err.to_string(), "network error");

        let send: SendError = err.into();
        assert_eq!(send.to_string(), "network error");
    }
}
