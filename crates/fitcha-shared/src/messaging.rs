//! Direct-message conversations and their messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, ProfileSummary, UserId};

/// One row of the caller's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub other_user_id: UserId,
    pub other_user_name: String,
    #[serde(default)]
    pub other_user_avatar: Option<String>,
    #[serde(default)]
    pub last_message_content: Option<String>,
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub unread_count: i64,
}

/// A message as rendered in a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: MessageId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

/// Raw `messages` table row, as delivered by change feeds and returned by
/// inserts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    /// Present when the insert selected the sender's profile.
    #[serde(default)]
    pub sender: Option<ProfileSummary>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let (sender_name, sender_avatar) = match row.sender {
            Some(profile) => (profile.display_name(), profile.avatar_url),
            None => (String::new(), None),
        };
        Self {
            message_id: MessageId::Server(row.id),
            sender_id: row.sender_id,
            sender_name,
            sender_avatar,
            content: row.content,
            created_at: row.created_at,
            is_read: row.is_read,
        }
    }
}

/// Insert payload for a new message.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
}
