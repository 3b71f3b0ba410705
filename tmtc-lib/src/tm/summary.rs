use std::collections::BTreeMap;

use hifitime::Epoch;
use serde::Serialize;

use super::ProcessedPacket;
use crate::{
    spacepacket::{missing_packets, Apid, PrimaryHeader},
    timecode::serialize_opt_epoch,
};

#[derive(Debug, Default, Clone, Serialize)]
pub struct ApidSummary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    pub corrupted: usize,
}

/// Tracks stats over a sequence of CCSDS packets.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Summary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    pub corrupted: usize,
    pub dropped: usize,
    #[serde(serialize_with = "serialize_opt_epoch")]
    pub first_generation_time: Option<Epoch>,
    #[serde(serialize_with = "serialize_opt_epoch")]
    pub last_generation_time: Option<Epoch>,
    pub apids: BTreeMap<Apid, ApidSummary>,

    #[serde(skip)]
    last_seq: BTreeMap<Apid, u16>,
}

impl Summary {
    pub fn add(&mut self, packet: &ProcessedPacket) {
        let len = packet.bytes().len();
        self.count += 1;
        self.bytes += len;
        if packet.corrupted() {
            self.corrupted += 1;
        }
        let t = packet.generation_time();
        if self.first_generation_time.map_or(true, |first| t < first) {
            self.first_generation_time = Some(t);
        }
        if self.last_generation_time.map_or(true, |last| t > last) {
            self.last_generation_time = Some(t);
        }

        let Some(hdr) = PrimaryHeader::decode(packet.bytes()) else {
            return;
        };
        let apid = self.apids.entry(hdr.apid).or_default();
        apid.count += 1;
        apid.bytes += len;
        if packet.corrupted() {
            apid.corrupted += 1;
        }
        if let Some(last) = self.last_seq.insert(hdr.apid, hdr.sequence_id) {
            let missing = missing_packets(hdr.sequence_id, last) as usize;
            apid.missing += missing;
            self.missing += missing;
        }
    }

    /// Record a packet that was dropped during preprocessing.
    pub fn add_dropped(&mut self) {
        self.dropped += 1;
    }
}
