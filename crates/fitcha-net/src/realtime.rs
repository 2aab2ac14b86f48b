//! Realtime socket orchestration with tokio mpsc command/notification pattern.
//!
//! The socket event loop runs in a dedicated tokio task. External code
//! communicates with it through typed command and notification channels,
//! keeping the push layer fully asynchronous and decoupled from the
//! containers that consume it.
//!
//! A dropped connection ends the task: it reports
//! [`RealtimeNotification::Disconnected`] and stops accepting commands.
//! Reconnecting is the owner's decision.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use url::Url;

use fitcha_shared::constants::HEARTBEAT_SECS;
use fitcha_shared::protocol::{ChangeEvent, ChannelKey, Frame, Inbound, TOPIC_PHOENIX};

use crate::topics::TopicTracker;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the realtime task.
#[derive(Debug)]
pub enum RealtimeCommand {
    /// Join the channel for `key`, authorising with `access_token`.
    Join {
        key: ChannelKey,
        access_token: Option<String>,
    },
    /// Leave the channel for `key`.
    Leave(ChannelKey),
    /// Request a snapshot of the tracked channel keys.
    GetTopics(oneshot::Sender<Vec<ChannelKey>>),
    /// Close the socket and stop the task.
    Shutdown,
}

/// Notifications sent *from* the realtime task to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeNotification {
    /// The server accepted a join.
    Joined { key: ChannelKey },
    /// The server rejected a join or errored an established channel.
    SubscriptionFailed { key: ChannelKey, reason: String },
    /// A row change arrived on a joined channel.
    Change { key: ChannelKey, event: ChangeEvent },
    /// The socket closed; the task has ended.
    Disconnected { reason: String },
}

/// Configuration for spawning the realtime task.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Socket endpoint including the `apikey` query parameter.
    pub url: Url,
    /// Interval between heartbeat frames.
    pub heartbeat: Duration,
}

impl RealtimeConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            heartbeat: Duration::from_secs(HEARTBEAT_SECS),
        }
    }
}

/// Connect the realtime socket and run it in a background tokio task.
///
/// # Returns
///
/// `(command_tx, notification_rx)`
pub async fn spawn_realtime(
    config: RealtimeConfig,
) -> anyhow::Result<(
    mpsc::Sender<RealtimeCommand>,
    mpsc::Receiver<RealtimeNotification>,
)> {
    let (socket, _response) = connect_async(config.url.as_str()).await?;
    info!(host = ?config.url.host_str(), "Realtime socket connected");

    let (mut sink, mut stream) = socket.split();

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<RealtimeCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<RealtimeNotification>(256);

    tokio::spawn(async move {
        let mut tracker = TopicTracker::new();
        let mut next_ref: u64 = 0;
        let mut heartbeat = tokio::time::interval(config.heartbeat);
        // The first tick fires immediately; skip it.
        heartbeat.tick().await;

        let disconnect_reason = loop {
            let outgoing: Option<Frame> = tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(RealtimeCommand::Join { key, access_token }) => {
                            next_ref += 1;
                            let reference = next_ref.to_string();
                            debug!(topic = %key, reference = %reference, "Joining channel");
                            tracker.on_join_sent(key, reference.clone());
                            Some(Frame::join(
                                &key.to_topic(),
                                &key.change_filters(),
                                access_token.as_deref(),
                                reference,
                            ))
                        }
                        Some(RealtimeCommand::Leave(key)) => {
                            let join_ref = tracker.join_ref(&key).map(str::to_string);
                            if tracker.remove(&key) {
                                next_ref += 1;
                                debug!(topic = %key, "Leaving channel");
                                Some(Frame::leave(&key.to_topic(), next_ref.to_string(), join_ref))
                            } else {
                                None
                            }
                        }
                        Some(RealtimeCommand::GetTopics(reply)) => {
                            let _ = reply.send(tracker.tracked_keys());
                            None
                        }
                        Some(RealtimeCommand::Shutdown) => {
                            info!("Realtime shutdown requested");
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break "shutdown".to_string();
                        }
                        None => {
                            info!("Command channel closed, shutting down realtime");
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break "command channel closed".to_string();
                        }
                    }
                }

                // --- Heartbeat ---
                _ = heartbeat.tick() => {
                    next_ref += 1;
                    Some(Frame::heartbeat(next_ref.to_string()))
                }

                // --- Socket frames ---
                message = stream.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            match Frame::from_json(&text) {
                                Ok(frame) => {
                                    handle_frame(frame, &mut tracker, &notif_tx).await;
                                }
                                Err(e) => {
                                    warn!(error = %e, "Undecodable realtime frame");
                                }
                            }
                            None
                        }
                        Some(Ok(WsMessage::Close(close))) => {
                            break close
                                .map(|c| c.reason.to_string())
                                .unwrap_or_else(|| "closed by server".to_string());
                        }
                        Some(Ok(_)) => None,
                        Some(Err(e)) => {
                            error!(error = %e, "Realtime socket error");
                            break e.to_string();
                        }
                        None => break "stream ended".to_string(),
                    }
                }
            };

            if let Some(frame) = outgoing {
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, event = %frame.event, "Failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    error!(error = %e, "Realtime send failed");
                    break e.to_string();
                }
            }
        };

        warn!(reason = %disconnect_reason, "Realtime event loop terminated");
        let _ = notif_tx
            .send(RealtimeNotification::Disconnected {
                reason: disconnect_reason,
            })
            .await;
    });

    Ok((cmd_tx, notif_rx))
}

async fn handle_frame(
    frame: Frame,
    tracker: &mut TopicTracker,
    notif_tx: &mpsc::Sender<RealtimeNotification>,
) {
    match frame.classify() {
        Inbound::Change { topic, event } => {
            let Some(key) = ChannelKey::from_topic(&topic) else {
                debug!(topic = %topic, "Change on unknown topic");
                return;
            };
            if !tracker.accepts_events(&key) {
                debug!(topic = %topic, "Change on untracked topic dropped");
                return;
            }
            debug!(topic = %topic, table = %event.table, kind = ?event.kind, "Change received");
            let _ = notif_tx
                .send(RealtimeNotification::Change { key, event })
                .await;
        }

        Inbound::Reply { topic, reference, ok, reason } => {
            if topic == TOPIC_PHOENIX {
                return;
            }
            let Some(key) = reference.as_deref().and_then(|r| tracker.find_by_ref(r)) else {
                return;
            };
            if ok {
                let elapsed = tracker.mark_joined(&key).unwrap_or_default();
                info!(
                    topic = %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    joined = tracker.joined_count(),
                    "Channel joined"
                );
                let _ = notif_tx.send(RealtimeNotification::Joined { key }).await;
            } else {
                tracker.mark_failed(&key);
                let reason = reason.unwrap_or_default();
                warn!(topic = %key, reason = %reason, "Channel join rejected");
                let _ = notif_tx
                    .send(RealtimeNotification::SubscriptionFailed { key, reason })
                    .await;
            }
        }

        Inbound::Closed { topic, join_ref } => {
            let Some(key) = ChannelKey::from_topic(&topic) else {
                return;
            };
            if !tracker.is_current(&key, join_ref.as_deref()) {
                debug!(topic = %topic, join_ref = ?join_ref, "Close for an earlier join ignored");
                return;
            }
            tracker.remove(&key);
            debug!(topic = %topic, "Channel closed");
        }

        Inbound::ChannelError { topic, join_ref } => {
            let Some(key) = ChannelKey::from_topic(&topic) else {
                return;
            };
            if !tracker.is_current(&key, join_ref.as_deref()) {
                debug!(topic = %topic, join_ref = ?join_ref, "Error for an earlier join ignored");
                return;
            }
            tracker.mark_failed(&key);
            warn!(topic = %topic, "Channel errored");
            let _ = notif_tx
                .send(RealtimeNotification::SubscriptionFailed {
                    key,
                    reason: "channel error".to_string(),
                })
                .await;
        }

        Inbound::Ignored => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::TopicState;
    use fitcha_shared::types::ConversationId;
    use serde_json::json;

    fn reply(topic: &str, reference: &str, status: &str) -> Frame {
        Frame {
            topic: topic.to_string(),
            event: "phx_reply".to_string(),
            payload: json!({ "status": status, "response": {} }),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    fn change(topic: &str) -> Frame {
        Frame {
            topic: topic.to_string(),
            event: "postgres_changes".to_string(),
            payload: json!({
                "data": { "table": "messages", "type": "INSERT", "record": { "id": 1 } }
            }),
            reference: None,
            join_ref: None,
        }
    }

    #[tokio::test]
    async fn test_join_reply_then_change_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::Conversation(ConversationId::new());
        tracker.on_join_sent(key, "5".into());

        handle_frame(reply(&key.to_topic(), "5", "ok"), &mut tracker, &tx).await;
        assert_eq!(rx.recv().await, Some(RealtimeNotification::Joined { key }));

        handle_frame(change(&key.to_topic()), &mut tracker, &tx).await;
        match rx.recv().await {
            Some(RealtimeNotification::Change { key: got, event }) => {
                assert_eq!(got, key);
                assert_eq!(event.record["id"], 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_change_after_leave_is_dropped() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::Conversation(ConversationId::new());
        tracker.on_join_sent(key, "1".into());
        tracker.remove(&key);

        handle_frame(change(&key.to_topic()), &mut tracker, &tx).await;
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    fn lifecycle(topic: &str, event: &str, join_ref: &str) -> Frame {
        Frame {
            topic: topic.to_string(),
            event: event.to_string(),
            payload: json!({}),
            reference: Some(join_ref.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    #[tokio::test]
    async fn test_late_close_for_previous_join_keeps_rejoin() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::Conversation(ConversationId::new());
        let topic = key.to_topic();

        tracker.on_join_sent(key, "1".into());
        tracker.mark_joined(&key);
        tracker.remove(&key);
        tracker.on_join_sent(key, "3".into());

        handle_frame(lifecycle(&topic, "phx_close", "1"), &mut tracker, &tx).await;
        assert_eq!(tracker.state(&key), Some(TopicState::Joining));

        handle_frame(reply(&topic, "3", "ok"), &mut tracker, &tx).await;
        assert_eq!(rx.recv().await, Some(RealtimeNotification::Joined { key }));
        assert!(tracker.accepts_events(&key));

        handle_frame(lifecycle(&topic, "phx_error", "1"), &mut tracker, &tx).await;
        assert_eq!(tracker.state(&key), Some(TopicState::Joined));

        handle_frame(lifecycle(&topic, "phx_close", "3"), &mut tracker, &tx).await;
        assert!(!tracker.accepts_events(&key));
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_rejected_join_reports_failure() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = TopicTracker::new();
        let key = ChannelKey::Conversation(ConversationId::new());
        tracker.on_join_sent(key, "2".into());

        handle_frame(reply(&key.to_topic(), "2", "error"), &mut tracker, &tx).await;
        match rx.recv().await {
            Some(RealtimeNotification::SubscriptionFailed { key: got, .. }) => assert_eq!(got, key),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!tracker.accepts_events(&key));
    }
}
