use std::sync::Arc;

use hifitime::Epoch;
use tracing::trace;
use typed_builder::TypedBuilder;

use super::{verify_check_word, DropReason, PacketPreprocessor, Preprocessed, Stamp, TmPacket};
use crate::{
    bytes::ByteOrder,
    events::{
        Event, EventProducer, LogEventProducer, CORRUPTED_PACKET, INVALID_TIME, SHORT_PACKET,
    },
    integrity::ErrorDetection,
    timecode::{EpochKind, TimeCodeKind, TimeEncoding, TimeEncodingConfig},
    Result,
};

const SEQ_COUNT_LEN: usize = 4;

/// Preprocessor for packets with a time code and a 4-byte sequence count at fixed offsets.
///
/// When configured, the check word is expected in the last two bytes of every packet.
#[derive(Debug, TypedBuilder)]
pub struct GenericPacketPreprocessor {
    #[builder(setter(into))]
    source: String,
    /// Offset of the time code, or `None` to use the reception time.
    timestamp_offset: Option<usize>,
    /// Offset of the sequence count, or `None` for packets without one.
    seq_count_offset: Option<usize>,
    #[builder(default)]
    error_detection: Option<Box<dyn ErrorDetection>>,
    #[builder(default = GenericPacketPreprocessor::default_time_encoding().build().unwrap_or_default())]
    time_encoding: TimeEncoding,
    #[builder(default)]
    byte_order: ByteOrder,
    #[builder(default = Arc::new(LogEventProducer) as Arc<dyn EventProducer>)]
    events: Arc<dyn EventProducer>,
}

impl GenericPacketPreprocessor {
    /// Milliseconds since the UNIX epoch in 8 bytes.
    #[must_use]
    pub fn default_time_encoding() -> TimeEncodingConfig {
        TimeEncodingConfig {
            kind: TimeCodeKind::Fixed,
            epoch: EpochKind::Unix,
            implicit_pfield: None,
            size: Some(8),
            multiplier: Some(0.001),
            ..TimeEncodingConfig::default()
        }
    }

    fn minimum_length(&self) -> usize {
        let seq_end = self.seq_count_offset.map_or(0, |o| o + SEQ_COUNT_LEN);
        let check_word = if self.error_detection.is_some() { 2 } else { 0 };
        seq_end.max(check_word)
    }

    fn generation_time(&self, packet: &TmPacket, corrupted: &mut bool) -> (Epoch, bool) {
        let Some(offset) = self.timestamp_offset else {
            return (packet.reception_time, true);
        };
        let decoded = match packet.bytes.get(offset..) {
            Some(buf) => self.time_encoding.decode(buf),
            None => Err(crate::Error::NotEnoughData {
                actual: packet.bytes.len(),
                minimum: offset,
            }),
        };
        match decoded {
            Ok(t) => (t, false),
            Err(err) => {
                self.events.send(Event::warning(
                    &self.source,
                    INVALID_TIME,
                    format!("failed to extract time from packet: {err}"),
                ));
                *corrupted = true;
                (packet.reception_time, true)
            }
        }
    }
}

impl PacketPreprocessor for GenericPacketPreprocessor {
    fn process(&self, packet: TmPacket) -> Result<Preprocessed> {
        let minimum = self.minimum_length();
        if packet.bytes.len() < minimum {
            let reason = DropReason::TooShort {
                length: packet.bytes.len(),
                minimum,
            };
            self.events
                .send(Event::warning(&self.source, SHORT_PACKET, reason.to_string()));
            return Ok(Preprocessed::Dropped(reason));
        }

        let mut corrupted = false;
        if let Some(alg) = &self.error_detection {
            if let Some(msg) = verify_check_word(alg.as_ref(), &packet.bytes) {
                self.events
                    .send(Event::warning(&self.source, CORRUPTED_PACKET, msg));
                corrupted = true;
            }
        }

        let seq = self.seq_count_offset.map_or(0, |o| {
            // length checked above
            let raw = self.byte_order.read_uint(&packet.bytes[o..o + SEQ_COUNT_LEN]);
            u32::try_from(raw).unwrap_or(u32::MAX)
        });
        let (generation_time, local_generation_time) =
            self.generation_time(&packet, &mut corrupted);
        trace!(link = %self.source, seq, corrupted, "preprocessed packet");

        Ok(Preprocessed::Packet(
            Stamp {
                generation_time,
                sequence_identifier: seq,
                corrupted,
                local_generation_time,
            }
            .apply(packet),
        ))
    }
}
