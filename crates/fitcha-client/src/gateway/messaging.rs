use serde_json::json;
use tracing::debug;

use fitcha_net::Query;
use fitcha_shared::constants::{
    RPC_CONVERSATION_MESSAGES, RPC_FIND_OR_CREATE_CONVERSATION, RPC_UNREAD_CONVERSATION_COUNT,
    RPC_USER_CONVERSATIONS, TABLE_MESSAGES,
};
use fitcha_shared::messaging::{Conversation, Message, MessageRow, NewMessage};
use fitcha_shared::types::{ConversationId, UserId};

use super::{decode, decode_count, decode_rows, Gateway, RemoteResult};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, created_at, is_read, sender:profiles(first_name, last_name, avatar_url)";

impl Gateway {
    pub async fn user_conversations(&self) -> RemoteResult<Vec<Conversation>> {
        self.guard("Failed to fetch conversations", async {
            decode_rows(self.backend.rpc(RPC_USER_CONVERSATIONS, json!({})).await?)
        })
        .await
    }

    pub async fn unread_conversation_count(&self) -> RemoteResult<i64> {
        self.guard("Failed to fetch unread count", async {
            decode_count(self.backend.rpc(RPC_UNREAD_CONVERSATION_COUNT, json!({})).await?)
        })
        .await
    }

    pub async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
    ) -> RemoteResult<Vec<Message>> {
        self.guard("Failed to fetch messages", async {
            let params = json!({ "p_conversation_id": conversation_id });
            decode_rows(self.backend.rpc(RPC_CONVERSATION_MESSAGES, params).await?)
        })
        .await
    }

    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> RemoteResult<Message> {
        let me = self.me()?;
        self.guard("Failed to send message", async {
            let row = serde_json::to_value(NewMessage {
                conversation_id,
                sender_id: me.id,
                content: content.to_string(),
            })?;
            let inserted = self
                .backend
                .insert(TABLE_MESSAGES, row, MESSAGE_COLUMNS)
                .await?;
            let row: MessageRow = decode(inserted)?;
            debug!(conversation = %conversation_id, message = row.id, "Message stored");
            Ok(Message::from(row))
        })
        .await
    }

    /// Find (or lazily create) the two-party conversation with `other`.
    pub async fn find_or_create_conversation(&self, other: UserId) -> RemoteResult<ConversationId> {
        let me = self.me()?;
        self.guard("Failed to open conversation", async {
            let params = json!({ "user1_id": me.id, "user2_id": other });
            decode(self.backend.rpc(RPC_FIND_OR_CREATE_CONVERSATION, params).await?)
        })
        .await
    }

    /// Send to a user rather than a thread, creating the conversation on
    /// first contact.
    pub async fn send_message_to_user(
        &self,
        recipient: UserId,
        content: &str,
    ) -> RemoteResult<(ConversationId, Message)> {
        let conversation_id = self.find_or_create_conversation(recipient).await?;
        let message = self.send_message(conversation_id, content).await?;
        Ok((conversation_id, message))
    }

    /// Mark every message in the conversation sent by the other party as read.
    pub async fn mark_messages_read(&self, conversation_id: ConversationId) -> RemoteResult<()> {
        let me = self.me()?;
        self.guard("Failed to mark messages as read", async {
            let query = Query::table(TABLE_MESSAGES)
                .select("id")
                .eq("conversation_id", conversation_id)
                .neq("sender_id", me.id)
                .eq("is_read", false);
            self.backend
                .update(&query, json!({ "is_read": true }))
                .await?;
            Ok(())
        })
        .await
    }
}
