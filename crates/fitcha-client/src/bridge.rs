use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fitcha_net::{RealtimeCommand, RealtimeConfig, RealtimeNotification};

use crate::events::{emit_event, ClientEvent, EventBus};
use crate::subscriptions::SubscriptionRegistry;

/// Start the realtime task, attach it to `registry`, and spawn the loop
/// that routes its notifications.
pub async fn start_realtime_and_bridge(
    config: RealtimeConfig,
    access_token: Option<String>,
    registry: SubscriptionRegistry,
    events: EventBus,
) -> anyhow::Result<mpsc::Sender<RealtimeCommand>> {
    let host = config.url.host_str().unwrap_or_default().to_string();
    let (cmd_tx, notif_rx) = fitcha_net::spawn_realtime(config).await?;
    info!(host = %host, "Realtime started");

    let connection = registry.attach(cmd_tx.clone(), access_token);

    tokio::spawn(async move {
        notification_loop(registry, events, connection, notif_rx).await;
    });

    Ok(cmd_tx)
}

/// Receive realtime notifications and dispatch them to the registered
/// push handlers until the realtime task goes away. Once `connection` is
/// no longer the registry's current one, notifications are dropped.
pub async fn notification_loop(
    registry: SubscriptionRegistry,
    events: EventBus,
    connection: u64,
    mut notif_rx: mpsc::Receiver<RealtimeNotification>,
) {
    info!("Realtime notification bridge started");

    while let Some(notification) = notif_rx.recv().await {
        match &notification {
            RealtimeNotification::Joined { key } => {
                debug!(topic = %key, "Channel joined (bridge)");
            }
            RealtimeNotification::Change { key, event } => {
                debug!(topic = %key, table = %event.table, kind = ?event.kind, "Change received on bridge");
            }
            RealtimeNotification::SubscriptionFailed { .. } => {}
            RealtimeNotification::Disconnected { reason } if registry.is_current(connection) => {
                warn!(reason = %reason, "Realtime disconnected (bridge)");
                emit_event(
                    &events,
                    ClientEvent::RealtimeDisconnected {
                        reason: reason.clone(),
                    },
                );
            }
            RealtimeNotification::Disconnected { reason } => {
                debug!(reason = %reason, "Previous realtime connection ended");
            }
        }
        registry.dispatch_from(connection, notification).await;
    }

    info!("Realtime notification bridge stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use fitcha_shared::protocol::{ChangeEvent, ChangeKind, ChannelKey};
    use fitcha_shared::types::UserId;
    use serde_json::json;

    use super::*;
    use crate::subscriptions::PushHandler;

    #[derive(Default)]
    struct Seen(AtomicUsize);

    #[async_trait]
    impl PushHandler for Seen {
        async fn on_change(&self, _event: ChangeEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_degraded(&self, _reason: &str) {}
    }

    #[tokio::test]
    async fn test_loop_routes_changes_and_reports_disconnect() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let registry = SubscriptionRegistry::new();
        let connection = registry.attach(cmd_tx, None);
        let events = EventBus::default();
        let mut event_rx = events.subscribe();

        let key = ChannelKey::MyNotifications(UserId::new());
        let seen = Arc::new(Seen::default());
        let _handle = registry.subscribe(key, seen.clone()).await;

        let (notif_tx, notif_rx) = mpsc::channel(8);
        let task = tokio::spawn(notification_loop(
            registry.clone(),
            events.clone(),
            connection,
            notif_rx,
        ));

        notif_tx
            .send(RealtimeNotification::Change {
                key,
                event: ChangeEvent {
                    table: "notifications".into(),
                    kind: ChangeKind::Insert,
                    record: json!({}),
                    old_record: None,
                    commit_timestamp: None,
                },
            })
            .await
            .unwrap();
        notif_tx
            .send(RealtimeNotification::Disconnected {
                reason: "closed".into(),
            })
            .await
            .unwrap();
        drop(notif_tx);
        task.await.unwrap();

        assert_eq!(seen.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            event_rx.recv().await.unwrap(),
            ClientEvent::RealtimeDisconnected {
                reason: "closed".into()
            }
        );
        assert!(!registry.is_connected());
    }

    #[tokio::test]
    async fn test_previous_loop_shutdown_leaves_new_connection_live() {
        let registry = SubscriptionRegistry::new();
        let events = EventBus::default();
        let mut event_rx = events.subscribe();

        let (old_cmd_tx, _old_cmd_rx) = mpsc::channel(8);
        let old = registry.attach(old_cmd_tx, None);
        let (old_notif_tx, old_notif_rx) = mpsc::channel(8);
        let old_task = tokio::spawn(notification_loop(
            registry.clone(),
            events.clone(),
            old,
            old_notif_rx,
        ));

        registry.release_all();
        registry.detach();
        let (new_cmd_tx, _new_cmd_rx) = mpsc::channel(8);
        registry.attach(new_cmd_tx, None);
        let key = ChannelKey::MyNotifications(UserId::new());
        let seen = Arc::new(Seen::default());
        let _handle = registry.subscribe(key, seen.clone()).await;

        old_notif_tx
            .send(RealtimeNotification::Disconnected {
                reason: "shutdown".into(),
            })
            .await
            .unwrap();
        drop(old_notif_tx);
        old_task.await.unwrap();

        assert!(registry.is_connected());
        assert!(registry.is_active(&key));
        assert!(event_rx.try_recv().is_err());
    }
}
