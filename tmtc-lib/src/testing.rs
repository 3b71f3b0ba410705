//! Recording collaborators and helpers shared by the unit and integration tests.
//!
//! Compiled for this crate's own tests and, through the `testing` feature, for anything else
//! that wants to observe what a link publishes.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use hifitime::Epoch;
use parking_lot::Mutex;

use crate::{
    events::{Event, EventProducer},
    tc::{AckStatus, AttrValue, CommandHistoryPublisher, CommandId, PreparedCommand},
    timecode::TimeService,
    tm::{ProcessedPacket, TmSink},
};

/// Poll `cond` until it holds, panicking after 5 seconds.
pub fn wait_for<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<Epoch>);

impl ManualClock {
    pub fn new(now: Epoch) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    pub fn advance(&self, by: hifitime::Duration) {
        let mut now = self.0.lock();
        *now = *now + by;
    }
}

impl TimeService for ManualClock {
    fn now(&self) -> Epoch {
        *self.0.lock()
    }
}

#[derive(Debug, Default)]
pub struct EventRecorder(Mutex<Vec<Event>>);

impl EventRecorder {
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.0.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }
}

impl EventProducer for EventRecorder {
    fn send(&self, event: Event) {
        self.0.lock().push(event);
    }
}

#[derive(Default)]
pub struct PacketRecorder(Mutex<Vec<ProcessedPacket>>);

impl PacketRecorder {
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn packets(&self) -> Vec<ProcessedPacket> {
        self.0.lock().clone()
    }
}

impl TmSink for PacketRecorder {
    fn process_packet(&self, packet: ProcessedPacket) {
        self.0.lock().push(packet);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Ack {
        name: String,
        status: AckStatus,
        reason: Option<String>,
    },
    Failed {
        reason: String,
    },
    Attr {
        key: String,
        value: AttrValue,
    },
}

#[derive(Debug, Default)]
pub struct HistoryRecorder(Mutex<Vec<(CommandId, HistoryEntry)>>);

impl HistoryRecorder {
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.0.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Entries of the command with sequence number `seq`.
    pub fn entries_for(&self, seq: u32) -> Vec<HistoryEntry> {
        self.0
            .lock()
            .iter()
            .filter(|(id, _)| id.sequence_number == seq)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn acks_for(&self, seq: u32) -> Vec<(AckStatus, Option<String>)> {
        self.entries_for(seq)
            .into_iter()
            .filter_map(|e| match e {
                HistoryEntry::Ack { status, reason, .. } => Some((status, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn attr_for(&self, seq: u32, key: &str) -> Option<AttrValue> {
        self.entries_for(seq).into_iter().find_map(|e| match e {
            HistoryEntry::Attr { key: k, value } if k == key => Some(value),
            _ => None,
        })
    }

    pub fn attr(&self, key: &str) -> Vec<AttrValue> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                HistoryEntry::Attr { key: k, value } if k == key => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<(AckStatus, Option<String>)> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                HistoryEntry::Ack { status, reason, .. } => Some((status, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                HistoryEntry::Failed { reason } => Some(reason),
                _ => None,
            })
            .collect()
    }
}

impl CommandHistoryPublisher for HistoryRecorder {
    fn publish_ack(
        &self,
        id: &CommandId,
        name: &str,
        _time: Epoch,
        status: AckStatus,
        reason: Option<&str>,
    ) {
        self.0.lock().push((
            id.clone(),
            HistoryEntry::Ack {
                name: name.to_string(),
                status,
                reason: reason.map(str::to_string),
            },
        ));
    }

    fn command_failed(&self, id: &CommandId, _time: Epoch, reason: &str) {
        self.0.lock().push((
            id.clone(),
            HistoryEntry::Failed {
                reason: reason.to_string(),
            },
        ));
    }

    fn publish(&self, id: &CommandId, key: &str, value: AttrValue) {
        self.0.lock().push((
            id.clone(),
            HistoryEntry::Attr {
                key: key.to_string(),
                value,
            },
        ));
    }
}

#[must_use]
pub fn command_id(seq: u32) -> CommandId {
    CommandId {
        origin: "test".to_string(),
        sequence_number: seq,
        generation_time: Epoch::from_gregorian_utc_at_midnight(2024, 1, 1),
        command_name: "/CMD".to_string(),
    }
}

#[must_use]
pub fn command(seq: u32, binary: Vec<u8>) -> PreparedCommand {
    PreparedCommand::new(command_id(seq), binary)
}
