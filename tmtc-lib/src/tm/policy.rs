use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProcessedPacket, TmSink};
use crate::{Error, Result};

/// What to do with packets flagged corrupted.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidPacketPolicy {
    /// Discard them.
    Drop,
    /// Forward them, flagged, like any other packet.
    #[default]
    Process,
    /// Forward them to a separate sink.
    Divert,
}

/// Sink adapter applying an [InvalidPacketPolicy] in front of another sink.
pub struct InvalidPacketFilter {
    policy: InvalidPacketPolicy,
    sink: Arc<dyn TmSink>,
    divert: Option<Arc<dyn TmSink>>,
    dropped: AtomicU64,
}

impl InvalidPacketFilter {
    /// # Errors
    /// [Error::Config] if `policy` is [InvalidPacketPolicy::Divert] and there is no `divert`
    /// sink.
    pub fn new(
        policy: InvalidPacketPolicy,
        sink: Arc<dyn TmSink>,
        divert: Option<Arc<dyn TmSink>>,
    ) -> Result<Self> {
        if policy == InvalidPacketPolicy::Divert && divert.is_none() {
            return Err(Error::Config(
                "invalidPackets DIVERT requires a sink for invalid packets".to_string(),
            ));
        }
        Ok(Self {
            policy,
            sink,
            divert,
            dropped: AtomicU64::new(0),
        })
    }

    /// Number of corrupted packets discarded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TmSink for InvalidPacketFilter {
    fn process_packet(&self, packet: ProcessedPacket) {
        if !packet.corrupted() {
            self.sink.process_packet(packet);
            return;
        }
        match (self.policy, &self.divert) {
            (InvalidPacketPolicy::Process, _) => self.sink.process_packet(packet),
            (InvalidPacketPolicy::Divert, Some(divert)) => divert.process_packet(packet),
            _ => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    seq = packet.sequence_identifier(),
                    "dropping corrupted packet"
                );
            }
        }
    }
}
