use hifitime::Epoch;
use tracing::{info, warn};

use super::{AckStatus, AttrValue, CommandHistoryPublisher, CommandId};

/// Writes command history to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCommandHistory;

impl CommandHistoryPublisher for LogCommandHistory {
    fn publish_ack(
        &self,
        id: &CommandId,
        name: &str,
        time: Epoch,
        status: AckStatus,
        reason: Option<&str>,
    ) {
        info!(cmd = %id, ack = name, %status, %time, reason = reason.unwrap_or(""), "ack");
    }

    fn command_failed(&self, id: &CommandId, time: Epoch, reason: &str) {
        warn!(cmd = %id, %time, reason, "command failed");
    }

    fn publish(&self, id: &CommandId, key: &str, value: AttrValue) {
        info!(cmd = %id, key, ?value, "attribute");
    }
}
