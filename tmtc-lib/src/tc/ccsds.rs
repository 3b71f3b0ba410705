use std::sync::Arc;

use tracing::{debug, error, warn};
use typed_builder::TypedBuilder;

use super::{
    AttrValue, CommandHistoryPublisher, CommandPostprocessor, PreparedCommand, ATTR_BINARY,
    ATTR_CHECKSUM, ATTR_SEQCOUNT,
};
use crate::{
    integrity::{Crc16Ccitt, ErrorDetection},
    spacepacket::{
        apid, has_secondary_header, secondary, set_data_length, set_sequence_count,
        PrimaryHeader, SequenceCounters,
    },
    timecode::{encode_cuc, TimeEpoch},
};

/// Postprocessor for CCSDS commands.
///
/// In order: room is made for a trailing check word if the checksum indicator is set, the
/// command is zero-padded to the minimum length and, optionally, to an even length, the length
/// field is rewritten, the next sequence count for the APID is assigned, the generation time is
/// written into the secondary header and finally the check word is computed.
#[derive(Debug, TypedBuilder)]
pub struct CcsdsCommandPostprocessor {
    #[builder(setter(into))]
    source: String,
    #[builder(default = Some(Box::new(Crc16Ccitt::default()) as Box<dyn ErrorDetection>))]
    error_detection: Option<Box<dyn ErrorDetection>>,
    #[builder(default)]
    minimum_length: usize,
    #[builder(default)]
    enforce_even_length: bool,
    /// Epoch of the CUC generation time.
    #[builder(default = TimeEpoch::Gps)]
    epoch: TimeEpoch,
    /// Sequence counts assigned per APID.
    #[builder(default)]
    counters: SequenceCounters,
    history: Arc<dyn CommandHistoryPublisher>,
}

impl CcsdsCommandPostprocessor {
    fn write_generation_time(&self, command: &PreparedCommand, binary: &mut [u8]) {
        let field = secondary::TIME_OFFSET..secondary::TIME_OFFSET + secondary::TIME_LEN;
        let Some(buf) = binary.get_mut(field) else {
            warn!(link = %self.source, cmd = %command.id, "command too short for generation time");
            return;
        };
        let offset = self.epoch.offset_of(command.id.generation_time);
        if let Err(err) = encode_cuc(offset, 4, 1, buf) {
            warn!(link = %self.source, cmd = %command.id, "cannot encode generation time: {err}");
        }
    }

    fn write_check_word(&self, command: &PreparedCommand, alg: &dyn ErrorDetection, binary: &mut [u8]) {
        let n = binary.len() - 2;
        match alg.compute(binary, 0, n) {
            Ok(checkword) => {
                binary[n..].copy_from_slice(&checkword.to_be_bytes());
                self.history
                    .publish(&command.id, ATTR_CHECKSUM, AttrValue::Int(i64::from(checkword)));
            }
            Err(err) => {
                warn!(link = %self.source, cmd = %command.id, "cannot compute check word: {err}");
            }
        }
    }
}

impl CommandPostprocessor for CcsdsCommandPostprocessor {
    fn process(&self, command: &PreparedCommand) -> Option<Vec<u8>> {
        let mut binary = command.binary.clone();
        if binary.len() < PrimaryHeader::LEN {
            error!(
                link = %self.source,
                cmd = %command.id,
                len = binary.len(),
                "command shorter than a primary header"
            );
            return None;
        }

        let check_word = self
            .error_detection
            .as_deref()
            .filter(|_| secondary::has_checksum(&binary));
        if check_word.is_some() {
            binary.extend_from_slice(&[0, 0]);
        }
        if binary.len() < self.minimum_length {
            binary.resize(self.minimum_length, 0);
        }
        if self.enforce_even_length && binary.len() % 2 == 1 {
            binary.push(0);
        }

        let Ok(len_minus1) = u16::try_from(binary.len() - PrimaryHeader::LEN_OFFSET) else {
            error!(link = %self.source, cmd = %command.id, len = binary.len(), "command too long");
            return None;
        };
        set_data_length(&mut binary, len_minus1);

        let seq = self.counters.next(apid(&binary));
        set_sequence_count(&mut binary, seq);
        self.history
            .publish(&command.id, ATTR_SEQCOUNT, AttrValue::Int(i64::from(seq)));

        if has_secondary_header(&binary) {
            self.write_generation_time(command, &mut binary);
        }
        if let Some(alg) = check_word {
            self.write_check_word(command, alg, &mut binary);
        }

        debug!(link = %self.source, cmd = %command.id, seq, len = binary.len(), "postprocessed command");
        self.history
            .publish(&command.id, ATTR_BINARY, AttrValue::Binary(binary.clone()));
        Some(binary)
    }
}
