use std::sync::Arc;

use hifitime::Epoch;
use tracing::{trace, warn};
use typed_builder::TypedBuilder;

use super::{verify_check_word, DropReason, PacketPreprocessor, Preprocessed, Stamp, TmPacket};
use crate::{
    events::{
        Event, EventProducer, LogEventProducer, CORRUPTED_PACKET, INVALID_TIME, SEQ_COUNT_JUMP,
        SHORT_PACKET,
    },
    integrity::{Crc16Ccitt, ErrorDetection},
    spacepacket::{
        apid, has_secondary_header, missing_packets, secondary, sequence_count, Apid,
        SequenceCounters,
    },
    timecode::TimeEncoding,
    Result,
};

/// Preprocessor for CCSDS packets carrying the secondary header layout of
/// [crate::spacepacket::secondary].
///
/// Packets shorter than [secondary::MIN_PACKET_LEN] are dropped. If the checksum indicator is
/// set the trailing check word is verified and a mismatch flags the packet corrupted. The
/// generation time is decoded from the secondary header and the sequence identifier combines
/// APID and sequence count.
#[derive(Debug, TypedBuilder)]
pub struct CcsdsPacketPreprocessor {
    /// Name events are attributed to.
    #[builder(setter(into))]
    source: String,
    #[builder(default = Some(Box::new(Crc16Ccitt::default()) as Box<dyn ErrorDetection>))]
    error_detection: Option<Box<dyn ErrorDetection>>,
    #[builder(default)]
    time_encoding: TimeEncoding,
    /// Use the reception time rather than the time in the packet.
    #[builder(default)]
    use_local_generation_time: bool,
    #[builder(default = true)]
    check_sequence: bool,
    /// Last sequence count seen per APID.
    #[builder(default)]
    counters: SequenceCounters,
    #[builder(default = Arc::new(LogEventProducer) as Arc<dyn EventProducer>)]
    events: Arc<dyn EventProducer>,
}

impl CcsdsPacketPreprocessor {
    /// Sequence identifier of a packet from `apid` with sequence count `seq`.
    #[must_use]
    pub fn sequence_identifier(apid: Apid, seq: u16) -> u32 {
        (u32::from(apid) << 16) | u32::from(seq)
    }

    fn warn(&self, kind: &str, message: String) {
        self.events.send(Event::warning(&self.source, kind, message));
    }

    /// Returns the generation time and whether it is local.
    fn generation_time(&self, packet: &TmPacket, corrupted: &mut bool) -> (Epoch, bool) {
        if self.use_local_generation_time || !has_secondary_header(&packet.bytes) {
            return (packet.reception_time, true);
        }
        match self
            .time_encoding
            .decode(&packet.bytes[secondary::TIME_OFFSET..])
        {
            Ok(t) => (t, false),
            Err(err) => {
                warn!(link = %self.source, "failed to extract time from packet: {err}");
                self.warn(INVALID_TIME, format!("failed to extract time from packet: {err}"));
                *corrupted = true;
                (packet.reception_time, true)
            }
        }
    }

    fn check_continuity(&self, apid: Apid, seq: u16) {
        let Some(last) = self.counters.swap(apid, seq) else {
            return;
        };
        let missing = missing_packets(seq, last);
        if missing != 0 {
            self.warn(
                SEQ_COUNT_JUMP,
                format!(
                    "sequence count jump for apid {apid}: {last} -> {seq} ({missing} missing)"
                ),
            );
        }
    }
}

impl PacketPreprocessor for CcsdsPacketPreprocessor {
    fn process(&self, packet: TmPacket) -> Result<Preprocessed> {
        let buf = &packet.bytes;
        if buf.len() < secondary::MIN_PACKET_LEN {
            let reason = DropReason::TooShort {
                length: buf.len(),
                minimum: secondary::MIN_PACKET_LEN,
            };
            self.warn(SHORT_PACKET, reason.to_string());
            return Ok(Preprocessed::Dropped(reason));
        }

        let mut corrupted = false;
        if let Some(alg) = &self.error_detection {
            if secondary::has_checksum(buf) {
                if let Some(msg) = verify_check_word(alg.as_ref(), buf) {
                    self.warn(CORRUPTED_PACKET, msg);
                    corrupted = true;
                }
            }
        }

        let apid = apid(buf);
        let seq = sequence_count(buf);
        let (generation_time, local_generation_time) =
            self.generation_time(&packet, &mut corrupted);
        if self.check_sequence {
            self.check_continuity(apid, seq);
        }
        trace!(link = %self.source, apid, seq, corrupted, "preprocessed packet");

        Ok(Preprocessed::Packet(
            Stamp {
                generation_time,
                sequence_identifier: Self::sequence_identifier(apid, seq),
                corrupted,
                local_generation_time,
            }
            .apply(packet),
        ))
    }
}

#[cfg(test)]
mod tests {
    use hifitime::Duration;

    use super::*;
    use crate::{
        spacepacket::{
            secondary::{set_checksum_indicator, set_cuc_time},
            set_header, SEQ_UNSEGMENTED, TYPE_TM,
        },
        testing::EventRecorder,
        timecode::TimeEpoch,
    };

    fn packet(apid: Apid, seq: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        set_header(&mut buf, apid, TYPE_TM, true, SEQ_UNSEGMENTED, seq);
        set_cuc_time(&mut buf, 1_000, 0x80);
        set_checksum_indicator(&mut buf, true);
        let crc = Crc16Ccitt::default().checksum(&buf[..18]);
        buf[18..].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    fn reception() -> Epoch {
        Epoch::from_gregorian_utc_at_midnight(2024, 1, 1)
    }

    fn preprocessor(events: &Arc<EventRecorder>) -> CcsdsPacketPreprocessor {
        CcsdsPacketPreprocessor::builder()
            .source("test")
            .events(events.clone() as Arc<dyn EventProducer>)
            .build()
    }

    fn process(pp: &CcsdsPacketPreprocessor, buf: Vec<u8>) -> Preprocessed {
        pp.process(TmPacket::new(buf, reception())).unwrap()
    }

    #[test]
    fn valid_packet() {
        let events = Arc::new(EventRecorder::default());
        let pp = preprocessor(&events);
        let Preprocessed::Packet(p) = process(&pp, packet(5, 10)) else {
            panic!("expected packet");
        };
        assert!(!p.corrupted());
        assert_eq!(p.sequence_identifier(), 5 << 16 | 10);
        assert_eq!(
            p.generation_time(),
            TimeEpoch::Gps.to_epoch(Duration::from_total_nanoseconds(1_000_500_000_000))
        );
        assert!(!p.local_generation_time());
        assert_eq!(p.reception_time(), reception());
        assert!(events.is_empty());
    }

    #[test]
    fn corrupted_packet_is_forwarded() {
        let events = Arc::new(EventRecorder::default());
        let pp = preprocessor(&events);
        let mut buf = packet(5, 10);
        buf[12] ^= 0xff;
        let Preprocessed::Packet(p) = process(&pp, buf) else {
            panic!("expected packet");
        };
        assert!(p.corrupted());
        assert_eq!(p.sequence_identifier(), 5 << 16 | 10);
        assert_eq!(events.count(CORRUPTED_PACKET), 1);
    }

    #[test]
    fn checksum_not_verified_without_indicator() {
        let events = Arc::new(EventRecorder::default());
        let pp = preprocessor(&events);
        let mut buf = packet(5, 10);
        set_checksum_indicator(&mut buf, false);
        let Preprocessed::Packet(p) = process(&pp, buf) else {
            panic!("expected packet");
        };
        assert!(!p.corrupted());
    }

    #[test]
    fn short_packet_is_dropped() {
        let events = Arc::new(EventRecorder::default());
        let pp = preprocessor(&events);
        let result = process(&pp, vec![0u8; 15]);
        assert_eq!(
            result,
            Preprocessed::Dropped(DropReason::TooShort {
                length: 15,
                minimum: 16
            })
        );
        assert_eq!(events.count(SHORT_PACKET), 1);
    }

    #[test]
    fn sequence_jump_warns_once() {
        let events = Arc::new(EventRecorder::default());
        let pp = preprocessor(&events);
        for seq in [1, 2, 3, 5] {
            process(&pp, packet(5, seq));
        }
        assert_eq!(events.count(SEQ_COUNT_JUMP), 1);
    }

    #[test]
    fn sequence_wrap_is_continuous() {
        let events = Arc::new(EventRecorder::default());
        let pp = preprocessor(&events);
        process(&pp, packet(5, 16383));
        process(&pp, packet(5, 0));
        // a different APID starts its own sequence
        process(&pp, packet(6, 100));
        assert!(events.is_empty());
    }

    #[test]
    fn sequence_check_can_be_disabled() {
        let events = Arc::new(EventRecorder::default());
        let pp = CcsdsPacketPreprocessor::builder()
            .source("test")
            .check_sequence(false)
            .events(events.clone() as Arc<dyn EventProducer>)
            .build();
        process(&pp, packet(5, 1));
        process(&pp, packet(5, 9));
        assert!(events.is_empty());
    }

    #[test]
    fn local_generation_time() {
        let pp = CcsdsPacketPreprocessor::builder()
            .source("test")
            .use_local_generation_time(true)
            .build();
        let Preprocessed::Packet(p) = process(&pp, packet(5, 10)) else {
            panic!("expected packet");
        };
        assert_eq!(p.generation_time(), reception());
        assert!(p.local_generation_time());
    }

    #[test]
    fn no_secondary_header_uses_reception_time() {
        let pp = CcsdsPacketPreprocessor::builder().source("test").build();
        let mut buf = vec![0u8; 16];
        set_header(&mut buf, 7, TYPE_TM, false, SEQ_UNSEGMENTED, 1);
        let Preprocessed::Packet(p) = process(&pp, buf) else {
            panic!("expected packet");
        };
        assert_eq!(p.generation_time(), reception());
        assert_eq!(p.sequence_identifier(), 7 << 16 | 1);
    }
}
