use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Auth-provider user id.
    UserId
);
uuid_id!(ConversationId);
uuid_id!(SessionId);
uuid_id!(NotificationId);
uuid_id!(FriendshipId);
uuid_id!(GameRequestId);
uuid_id!(CourtId);

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Name and avatar joined onto rows that reference another user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProfileSummary {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl ProfileSummary {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Message ids
// ---------------------------------------------------------------------------

/// Temporary id of an optimistic entry.
///
/// Scoped to one [`LocalIdGenerator`] (one client session), so two
/// generators never hand out the same id and a local id can never be
/// mistaken for a server id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LocalId {
    pub namespace: Uuid,
    pub seq: u64,
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "local-{}-{}", self.namespace.simple(), self.seq)
    }
}

/// Id of a chat entry: confirmed rows carry the server id, optimistic
/// rows carry a [`LocalId`] until the write resolves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum MessageId {
    Server(i64),
    Local(LocalId),
}

impl MessageId {
    pub fn is_local(&self) -> bool {
        matches!(self, MessageId::Local(_))
    }

    pub fn server(&self) -> Option<i64> {
        match self {
            MessageId::Server(id) => Some(*id),
            MessageId::Local(_) => None,
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Server(id) => write!(f, "{id}"),
            MessageId::Local(local) => write!(f, "{local}"),
        }
    }
}

/// Hands out [`LocalId`]s for optimistic entries.
#[derive(Debug)]
pub struct LocalIdGenerator {
    namespace: Uuid,
    next: AtomicU64,
}

impl LocalIdGenerator {
    pub fn new() -> Self {
        Self {
            namespace: Uuid::new_v4(),
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> LocalId {
        LocalId {
            namespace: self.namespace,
            seq: self.next.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for LocalIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
