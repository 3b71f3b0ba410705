//! Space packets multiplexed into AOS transfer frames.
//!
//! Each datagram carries one frame:
//!
//! ```text
//! | VCDU header (6) | insert zone | M_PDU header (2) | packet zone | OCF (4)? | FECF (2)? |
//! ```
//!
//! Packets may span frames of the same virtual channel; the M_PDU first header pointer
//! locates the first packet header so decoding can resume after a gap.
//!
//! References:
//! * CCSDS AOS Space Data Link Protocol 732.0-B-4
use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{udp::UdpTmTransport, Interrupt, TmTransport};
use crate::{
    integrity::Crc16Ccitt,
    spacepacket::{self, PrimaryHeader},
    Result,
};

pub type Scid = u16;
pub type Vcid = u16;

/// Receive buffer size when no frame length is configured.
const DEFAULT_MAX_FRAME_LENGTH: usize = 2048;
const OCF_LEN: usize = 4;
const FECF_LEN: usize = 2;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct VcduHeader {
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub counter: u32,
    pub replay: bool,
}

impl VcduHeader {
    /// VCDU header length in bytes
    pub const LEN: usize = 6;
    /// VCID indicating a fill frame
    pub const FILL: Vcid = 63;
    /// Largest value of the 24-bit frame counter
    pub const COUNTER_MAX: u32 = 0xff_ffff;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        let &[id_hi, id_lo, count_hi, count_mid, count_lo, signalling, ..] = dat else {
            return None;
        };
        // version:2 scid:8 vcid:6
        let id = u16::from_be_bytes([id_hi, id_lo]);
        Some(VcduHeader {
            version: id_hi >> 6,
            scid: (id >> 6) & 0xff,
            vcid: id & 0x3f,
            counter: u32::from_be_bytes([0, count_hi, count_mid, count_lo]),
            replay: signalling & 0x80 != 0,
        })
    }
}

/// Number of frames missing between counter `last` and the following counter `cur`,
/// accounting for the 24-bit wrap. A repeated counter counts as a full cycle missing.
#[must_use]
pub fn missing_frames(cur: u32, last: u32) -> u32 {
    cur.wrapping_sub(last).wrapping_sub(1) & VcduHeader::COUNTER_MAX
}

/// Layout of the frames received by a frame link.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrameOptions {
    /// Expected frame length; frames of any other length are dropped.
    pub frame_length: Option<usize>,
    #[serde(default)]
    pub insert_zone_length: usize,
    /// Frames carry a 4 byte operational control field.
    #[serde(default)]
    pub ocf_present: bool,
    /// Frames end with a CRC-16 frame error control field, which is verified.
    #[serde(default = "default_true")]
    pub fecf_present: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FrameOptions {
    fn default() -> Self {
        FrameOptions {
            frame_length: None,
            insert_zone_length: 0,
            ocf_present: false,
            fecf_present: true,
        }
    }
}

impl FrameOptions {
    fn trailer_length(&self) -> usize {
        let mut len = 0;
        if self.ocf_present {
            len += OCF_LEN;
        }
        if self.fecf_present {
            len += FECF_LEN;
        }
        len
    }

    fn max_frame_length(&self) -> usize {
        self.frame_length.unwrap_or(DEFAULT_MAX_FRAME_LENGTH)
    }
}

/// M_PDU first header pointer values with special meaning.
const FHP_IDLE: u16 = 0x7fe;
const FHP_NO_HEADER: u16 = 0x7ff;

#[derive(Debug, Default)]
struct VcidTracker {
    // partial packet data not yet extracted
    cache: Vec<u8>,
    // true once a first header pointer located a packet start and data may be appended
    sync: bool,
    last_counter: Option<u32>,
}

impl VcidTracker {
    fn reset(&mut self) {
        self.cache.clear();
        self.sync = false;
    }
}

/// Reassembles space packets from a sequence of transfer frames.
#[derive(Debug)]
pub struct FramePacketExtractor {
    options: FrameOptions,
    crc: Crc16Ccitt,
    trackers: HashMap<Vcid, VcidTracker>,
    ready: VecDeque<Vec<u8>>,
}

impl FramePacketExtractor {
    #[must_use]
    pub fn new(options: FrameOptions) -> Self {
        Self {
            options,
            crc: Crc16Ccitt::default(),
            trackers: HashMap::default(),
            ready: VecDeque::default(),
        }
    }

    /// Forget all partial packets and frame counters.
    pub fn reset(&mut self) {
        self.trackers.clear();
        self.ready.clear();
    }

    /// Oldest complete packet not yet taken.
    pub fn next_packet(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Decode one frame and queue the packets it completes. Returns the number of packets
    /// queued.
    pub fn push_frame(&mut self, frame: &[u8]) -> usize {
        if let Some(expected) = self.options.frame_length {
            if frame.len() != expected {
                warn!(len = frame.len(), expected, "dropping frame with unexpected length");
                return 0;
            }
        }
        let trailer = self.options.trailer_length();
        let data_start = VcduHeader::LEN + self.options.insert_zone_length;
        if frame.len() < data_start + 2 + trailer {
            warn!(len = frame.len(), "dropping short frame");
            return 0;
        }
        let Some(header) = VcduHeader::decode(frame) else {
            return 0;
        };

        if self.options.fecf_present {
            let (body, fecf) = frame.split_at(frame.len() - FECF_LEN);
            let expected = u16::from_be_bytes([fecf[0], fecf[1]]);
            let computed = self.crc.checksum(body);
            if expected != computed {
                warn!(
                    vcid = header.vcid,
                    "dropping frame with bad FECF: computed={computed:#06x} frame={expected:#06x}"
                );
                if let Some(tracker) = self.trackers.get_mut(&header.vcid) {
                    tracker.reset();
                }
                return 0;
            }
        }
        if header.vcid == VcduHeader::FILL {
            trace!("fill frame");
            return 0;
        }

        let tracker = self.trackers.entry(header.vcid).or_default();
        if let Some(last) = tracker.last_counter {
            let missing = missing_frames(header.counter, last);
            if missing > 0 {
                debug!(vcid = header.vcid, missing, "frame counter gap, dropping partial packet");
                tracker.reset();
            }
        }
        tracker.last_counter = Some(header.counter);

        let mpdu = &frame[data_start..frame.len() - trailer];
        let first_header = u16::from_be_bytes([mpdu[0], mpdu[1]]) & 0x7ff;
        let payload = &mpdu[2..];

        if tracker.sync {
            tracker.cache.extend_from_slice(payload);
        } else {
            // no way to get sync without a packet header in this frame
            if first_header == FHP_NO_HEADER || first_header == FHP_IDLE {
                trace!(vcid = header.vcid, "no packet header, waiting for sync");
                return 0;
            }
            let offset = first_header as usize;
            if offset > payload.len() {
                debug!(vcid = header.vcid, offset, "invalid first header pointer");
                return 0;
            }
            tracker.sync = true;
            tracker.cache = payload[offset..].to_vec();
        }

        let mut count = 0;
        while let Some(packet_header) = PrimaryHeader::decode(&tracker.cache) {
            if packet_header.version != 0 || packet_header.type_flag != spacepacket::TYPE_TM {
                warn!(vcid = header.vcid, "bad packet version or type, dropping {packet_header:?}");
                tracker.reset();
                break;
            }
            let need = packet_header.packet_len();
            if tracker.cache.len() < need {
                break;
            }
            let tail = tracker.cache.split_off(need);
            let packet = std::mem::replace(&mut tracker.cache, tail);
            if packet_header.apid == PrimaryHeader::APID_MAX {
                trace!(vcid = header.vcid, "idle packet");
                continue;
            }
            self.ready.push_back(packet);
            count += 1;
        }
        count
    }
}

/// Receives transfer frames over UDP, one per datagram, and yields the packets they carry.
pub struct FrameTmTransport {
    udp: UdpTmTransport,
    extractor: FramePacketExtractor,
}

impl FrameTmTransport {
    #[must_use]
    pub fn new(host: &str, port: u16, options: FrameOptions) -> Self {
        Self {
            udp: UdpTmTransport::new(host, port, options.max_frame_length()),
            extractor: FramePacketExtractor::new(options),
        }
    }
}

impl TmTransport for FrameTmTransport {
    fn connect(&mut self) -> Result<Interrupt> {
        self.udp.connect()
    }

    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(packet) = self.extractor.next_packet() {
            return Ok(Some(packet));
        }
        if let Some(frame) = self.udp.read_packet()? {
            self.extractor.push_frame(&frame);
        }
        Ok(self.extractor.next_packet())
    }

    fn disconnect(&mut self) {
        self.udp.disconnect();
        self.extractor.reset();
    }

    fn describe(&self) -> String {
        format!("frames on {}", self.udp.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(apid: u16, seq: u16, len: usize) -> Vec<u8> {
        let mut buf: Vec<u8> = (0..len).map(|i| i as u8).collect();
        spacepacket::set_header(&mut buf, apid, 0, false, 3, seq);
        buf
    }

    fn frame(vcid: Vcid, counter: u32, first_header: u16, zone: &[u8]) -> Vec<u8> {
        let scid: u16 = 42;
        let id = (1u16 << 14) | (scid << 6) | vcid;
        let mut buf = id.to_be_bytes().to_vec();
        buf.extend_from_slice(&counter.to_be_bytes()[1..]);
        buf.push(0);
        buf.extend_from_slice(&first_header.to_be_bytes());
        buf.extend_from_slice(zone);
        let crc = Crc16Ccitt::default().checksum(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    #[test]
    fn vcdu_header_fields() {
        // version 1, scid 85, vcid 33, counter 123456, replay flag set, trailing data
        let dat = [0x55, 0x61, 0x01, 0xe2, 0x40, 0x85, 0xaa, 0xbb];
        assert_eq!(
            VcduHeader::decode(&dat),
            Some(VcduHeader {
                version: 1,
                scid: 85,
                vcid: 33,
                counter: 123_456,
                replay: true,
            })
        );

        let fill = [0x40, 0x3f, 0xff, 0xff, 0xff, 0x00];
        let header = VcduHeader::decode(&fill).unwrap();
        assert_eq!(header.vcid, VcduHeader::FILL);
        assert_eq!(header.counter, VcduHeader::COUNTER_MAX);
        assert!(!header.replay);

        assert_eq!(VcduHeader::decode(&dat[..VcduHeader::LEN - 1]), None);
    }

    #[test]
    fn missing_frame_counts() {
        assert_eq!(missing_frames(5, 4), 0);
        assert_eq!(missing_frames(7, 4), 2);
        assert_eq!(missing_frames(0, VcduHeader::COUNTER_MAX), 0);
        assert_eq!(missing_frames(1, VcduHeader::COUNTER_MAX), 1);
    }

    #[test]
    fn packets_within_one_frame() {
        let mut zone = packet(10, 1, 10);
        zone.extend(packet(10, 2, 12));
        let mut extractor = FramePacketExtractor::new(FrameOptions::default());

        assert_eq!(extractor.push_frame(&frame(1, 0, 0, &zone)), 2);
        assert_eq!(extractor.next_packet().unwrap(), packet(10, 1, 10));
        assert_eq!(extractor.next_packet().unwrap(), packet(10, 2, 12));
        assert!(extractor.next_packet().is_none());
    }

    #[test]
    fn packet_spanning_frames() {
        let a = packet(10, 1, 10);
        let b = packet(11, 1, 20);
        let c = packet(10, 2, 10);
        let mut zone1 = a.clone();
        zone1.extend_from_slice(&b[..5]);
        let mut zone2 = b[5..].to_vec();
        zone2.extend_from_slice(&c);

        let mut extractor = FramePacketExtractor::new(FrameOptions::default());
        assert_eq!(extractor.push_frame(&frame(1, 0, 0, &zone1)), 1);
        assert_eq!(extractor.push_frame(&frame(1, 1, 15, &zone2)), 2);
        assert_eq!(extractor.next_packet().unwrap(), a);
        assert_eq!(extractor.next_packet().unwrap(), b);
        assert_eq!(extractor.next_packet().unwrap(), c);
    }

    #[test]
    fn gap_drops_partial_packet_and_resyncs() {
        let b = packet(11, 1, 20);
        let c = packet(10, 2, 10);
        let zone1 = b[..5].to_vec();
        let mut zone2 = b[5..].to_vec();
        zone2.extend_from_slice(&c);

        let mut extractor = FramePacketExtractor::new(FrameOptions::default());
        assert_eq!(extractor.push_frame(&frame(1, 0, 0, &zone1)), 0);
        // counter 2: frame 1 is missing, resync on the first header pointer
        assert_eq!(extractor.push_frame(&frame(1, 2, 15, &zone2)), 1);
        assert_eq!(extractor.next_packet().unwrap(), c);
    }

    #[test]
    fn virtual_channels_are_independent() {
        let a = packet(10, 1, 20);
        let b = packet(20, 1, 10);

        let mut extractor = FramePacketExtractor::new(FrameOptions::default());
        assert_eq!(extractor.push_frame(&frame(1, 0, 0, &a[..8])), 0);
        assert_eq!(extractor.push_frame(&frame(2, 0, 0, &b)), 1);
        assert_eq!(extractor.push_frame(&frame(1, 1, FHP_NO_HEADER, &a[8..])), 1);
        assert_eq!(extractor.next_packet().unwrap(), b);
        assert_eq!(extractor.next_packet().unwrap(), a);
    }

    #[test]
    fn bad_fecf_dropped() {
        let mut data = frame(1, 0, 0, &packet(10, 1, 10));
        let last = data.len() - 1;
        data[last] ^= 0xff;

        let mut extractor = FramePacketExtractor::new(FrameOptions::default());
        assert_eq!(extractor.push_frame(&data), 0);
    }

    #[test]
    fn fill_and_unsynced_frames_yield_nothing() {
        let mut extractor = FramePacketExtractor::new(FrameOptions::default());
        assert_eq!(
            extractor.push_frame(&frame(VcduHeader::FILL, 0, 0, &packet(10, 1, 10))),
            0
        );
        assert_eq!(
            extractor.push_frame(&frame(1, 0, FHP_NO_HEADER, &packet(10, 1, 10))),
            0
        );
    }

    #[test]
    fn idle_packets_skipped() {
        let mut zone = packet(PrimaryHeader::APID_MAX, 0, 10);
        zone.extend(packet(10, 1, 10));
        let mut extractor = FramePacketExtractor::new(FrameOptions::default());
        assert_eq!(extractor.push_frame(&frame(1, 0, 0, &zone)), 1);
        assert_eq!(spacepacket::apid(&extractor.next_packet().unwrap()), 10);
    }

    #[test]
    fn unexpected_frame_length_dropped() {
        let options = FrameOptions {
            frame_length: Some(100),
            ..FrameOptions::default()
        };
        let mut extractor = FramePacketExtractor::new(options);
        assert_eq!(extractor.push_frame(&frame(1, 0, 0, &packet(10, 1, 10))), 0);
    }

    #[test]
    fn options_from_json() {
        let options: FrameOptions =
            serde_json::from_str(r#"{"frameLength": 1115, "ocfPresent": true}"#).unwrap();
        assert_eq!(options.frame_length, Some(1115));
        assert!(options.fecf_present);
        assert_eq!(options.trailer_length(), 6);
    }
}
