use serde_json::json;

use fitcha_net::Query;
use fitcha_shared::constants::{
    RPC_MARK_NOTIFICATIONS_READ, RPC_UNREAD_NOTIFICATIONS_COUNT, TABLE_NOTIFICATIONS,
};
use fitcha_shared::social::Notification;
use fitcha_shared::types::NotificationId;

use super::{decode_all, decode_count, Gateway, RemoteResult};

const NOTIFICATION_COLUMNS: &str =
    "*, actor_profile:profiles!fk_notification_actor(first_name, last_name, avatar_url)";

impl Gateway {
    /// The viewer's latest notifications, newest first.
    pub async fn notifications(&self) -> RemoteResult<Vec<Notification>> {
        let me = self.me()?;
        self.guard("Failed to fetch notifications", async {
            let query = Query::table(TABLE_NOTIFICATIONS)
                .select(NOTIFICATION_COLUMNS)
                .eq("user_id", me.id)
                .order("created_at", false)
                .limit(self.notification_limit);
            decode_all(self.backend.select(&query).await?)
        })
        .await
    }

    pub async fn unread_notification_count(&self) -> RemoteResult<i64> {
        self.guard("Failed to fetch unread notifications count", async {
            decode_count(self.backend.rpc(RPC_UNREAD_NOTIFICATIONS_COUNT, json!({})).await?)
        })
        .await
    }

    /// Mark `ids` as read, or every notification when `None`.
    pub async fn mark_notifications_read(
        &self,
        ids: Option<&[NotificationId]>,
    ) -> RemoteResult<()> {
        self.me()?;
        self.guard("Failed to mark notifications as read", async {
            let params = json!({ "notification_ids": ids });
            self.backend.rpc(RPC_MARK_NOTIFICATIONS_READ, params).await?;
            Ok(())
        })
        .await
    }
}
