//! Realtime channel keys and the JSON frames exchanged with the change-feed
//! socket.
//!
//! Frames follow the Phoenix channel envelope used by the hosted backend:
//! `{ topic, event, payload, ref, join_ref }`. Only the subset needed to
//! join `postgres_changes` streams, keep the socket alive, and read change
//! rows is modelled here.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{
    TABLE_GAME_REQUESTS, TABLE_GAME_SESSIONS, TABLE_MESSAGES, TABLE_NOTIFICATIONS,
    TABLE_SESSION_CHAT_MESSAGES, TOPIC_PREFIX,
};
use crate::types::{ConversationId, SessionId, UserId};

// ---------------------------------------------------------------------------
// Channel keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Conversation,
    MyConversations,
    SessionMessages,
    SessionUpdates,
    MyNotifications,
    MyGameRequests,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Conversation => "conversation_messages",
            ChannelKind::MyConversations => "user_conversations",
            ChannelKind::SessionMessages => "session_messages",
            ChannelKind::SessionUpdates => "session_updates",
            ChannelKind::MyNotifications => "user_notifications",
            ChannelKind::MyGameRequests => "user_game_requests",
        }
    }
}

/// One logical push stream: a (kind, key) pair. At most one subscription
/// per key is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Conversation(ConversationId),
    MyConversations(UserId),
    SessionMessages(SessionId),
    SessionUpdates(SessionId),
    MyNotifications(UserId),
    MyGameRequests(UserId),
}

impl ChannelKey {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelKey::Conversation(_) => ChannelKind::Conversation,
            ChannelKey::MyConversations(_) => ChannelKind::MyConversations,
            ChannelKey::SessionMessages(_) => ChannelKind::SessionMessages,
            ChannelKey::SessionUpdates(_) => ChannelKind::SessionUpdates,
            ChannelKey::MyNotifications(_) => ChannelKind::MyNotifications,
            ChannelKey::MyGameRequests(_) => ChannelKind::MyGameRequests,
        }
    }

    fn key_string(&self) -> String {
        match self {
            ChannelKey::Conversation(id) => id.to_string(),
            ChannelKey::SessionMessages(id) | ChannelKey::SessionUpdates(id) => id.to_string(),
            ChannelKey::MyConversations(user)
            | ChannelKey::MyNotifications(user)
            | ChannelKey::MyGameRequests(user) => user.to_string(),
        }
    }

    /// Socket topic, e.g. `realtime:conversation_messages:<uuid>`.
    pub fn to_topic(&self) -> String {
        format!("{TOPIC_PREFIX}{}:{}", self.kind().as_str(), self.key_string())
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(TOPIC_PREFIX)?;
        let (kind, key) = rest.split_once(':')?;
        let key = uuid::Uuid::parse_str(key).ok()?;
        let channel = match kind {
            "conversation_messages" => ChannelKey::Conversation(ConversationId(key)),
            "user_conversations" => ChannelKey::MyConversations(UserId(key)),
            "session_messages" => ChannelKey::SessionMessages(SessionId(key)),
            "session_updates" => ChannelKey::SessionUpdates(SessionId(key)),
            "user_notifications" => ChannelKey::MyNotifications(UserId(key)),
            "user_game_requests" => ChannelKey::MyGameRequests(UserId(key)),
            _ => return None,
        };
        Some(channel)
    }

    /// Row-change filters the server should stream for this key.
    pub fn change_filters(&self) -> Vec<ChangeFilter> {
        match self {
            ChannelKey::Conversation(id) => vec![ChangeFilter::new(
                ChangeKind::Insert,
                TABLE_MESSAGES,
                Some(format!("conversation_id=eq.{id}")),
            )],
            // Row-level security limits this to conversations the user is in.
            ChannelKey::MyConversations(_) => {
                vec![ChangeFilter::new(ChangeKind::Insert, TABLE_MESSAGES, None)]
            }
            ChannelKey::SessionMessages(id) => vec![ChangeFilter::new(
                ChangeKind::Insert,
                TABLE_SESSION_CHAT_MESSAGES,
                Some(format!("session_id=eq.{id}")),
            )],
            ChannelKey::SessionUpdates(id) => vec![ChangeFilter::new(
                ChangeKind::Update,
                TABLE_GAME_SESSIONS,
                Some(format!("id=eq.{id}")),
            )],
            ChannelKey::MyNotifications(user) => vec![ChangeFilter::new(
                ChangeKind::Insert,
                TABLE_NOTIFICATIONS,
                Some(format!("user_id=eq.{user}")),
            )],
            ChannelKey::MyGameRequests(user) => vec![ChangeFilter::new(
                ChangeKind::All,
                TABLE_GAME_REQUESTS,
                Some(format!("receiver_id=eq.{user}")),
            )],
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.key_string())
    }
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeKind {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "*")]
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeFilter {
    pub event: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ChangeFilter {
    pub fn new(event: ChangeKind, table: &str, filter: Option<String>) -> Self {
        Self {
            event,
            schema: "public".to_string(),
            table: table.to_string(),
            filter,
        }
    }
}

/// One row change delivered on a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Value,
    #[serde(default)]
    pub old_record: Option<Value>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Decode the new row into a typed record.
    pub fn decode_record<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.record)
    }
}

// ---------------------------------------------------------------------------
// Socket frames
// ---------------------------------------------------------------------------

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const TOPIC_PHOENIX: &str = "phoenix";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// What an inbound frame means to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Change { topic: String, event: ChangeEvent },
    Reply { topic: String, reference: Option<String>, ok: bool, reason: Option<String> },
    /// `join_ref` names the join the server is closing, when it says.
    Closed { topic: String, join_ref: Option<String> },
    ChannelError { topic: String, join_ref: Option<String> },
    Ignored,
}

impl Frame {
    pub fn join(topic: &str, filters: &[ChangeFilter], access_token: Option<&str>, reference: String) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": filters,
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload,
            reference: Some(reference.clone()),
            join_ref: Some(reference),
        }
    }

    pub fn leave(topic: &str, reference: String, join_ref: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference),
            join_ref,
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: TOPIC_PHOENIX.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Interpret the frame. Change payloads that fail to decode are
    /// reported as `Ignored`; the caller logs and moves on.
    pub fn classify(self) -> Inbound {
        match self.event.as_str() {
            EVENT_POSTGRES_CHANGES => {
                let data = self.payload.get("data").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<ChangeEvent>(data) {
                    Ok(event) => Inbound::Change { topic: self.topic, event },
                    Err(_) => Inbound::Ignored,
                }
            }
            EVENT_REPLY => {
                let ok = self.payload.get("status").and_then(Value::as_str) == Some("ok");
                let reason = if ok {
                    None
                } else {
                    Some(
                        self.payload
                            .get("response")
                            .and_then(|r| r.get("reason"))
                            .and_then(Value::as_str)
                            .unwrap_or("subscription rejected")
                            .to_string(),
                    )
                };
                Inbound::Reply { topic: self.topic, reference: self.reference, ok, reason }
            }
            // Lifecycle frames echo the join reference in `ref` when `join_ref` is absent.
            EVENT_CLOSE => Inbound::Closed {
                topic: self.topic,
                join_ref: self.join_ref.or(self.reference),
            },
            EVENT_ERROR => Inbound::ChannelError {
                topic: self.topic,
                join_ref: self.join_ref.or(self.reference),
            },
            _ => Inbound::Ignored,
        }
    }
}
