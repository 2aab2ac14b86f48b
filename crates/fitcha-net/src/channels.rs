use tokio::sync::mpsc;
use tracing::{debug, warn};

use fitcha_shared::protocol::ChannelKey;

use crate::error::{NetError, Result};
use crate::realtime::RealtimeCommand;

pub async fn join_channel(
    cmd_tx: &mpsc::Sender<RealtimeCommand>,
    key: ChannelKey,
    access_token: Option<String>,
) -> Result<()> {
    debug!(topic = %key, "Subscribing to channel");

    cmd_tx
        .send(RealtimeCommand::Join { key, access_token })
        .await
        .map_err(|_| NetError::ChannelClosed)?;

    Ok(())
}

/// Queue a leave without waiting. Usable from `Drop` and other sync paths;
/// a full or closed command channel only logs.
pub fn leave_channel(cmd_tx: &mpsc::Sender<RealtimeCommand>, key: ChannelKey) {
    if let Err(e) = cmd_tx.try_send(RealtimeCommand::Leave(key)) {
        warn!(topic = %key, error = %e, "Could not queue channel leave");
    }
}
