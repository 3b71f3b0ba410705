//! Inbound telemetry: packet preprocessing and the sink contract.
mod ccsds;
mod generic;
mod policy;
mod summary;

use std::{fmt::Debug, sync::Arc};

use hifitime::Epoch;
use serde::{Deserialize, Serialize};

pub use ccsds::CcsdsPacketPreprocessor;
pub use generic::GenericPacketPreprocessor;
pub use policy::{InvalidPacketFilter, InvalidPacketPolicy};
pub use summary::{ApidSummary, Summary};

use crate::{
    bytes::ByteOrder,
    events::EventProducer,
    integrity::{Crc16Ccitt, ErrorDetection, ErrorDetectionConfig},
    spacepacket::SequenceCounters,
    timecode::{serialize_epoch, serialize_opt_epoch, TimeEncodingConfig},
    Result,
};

/// A framed packet as received from a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TmPacket {
    pub bytes: Vec<u8>,
    pub reception_time: Epoch,
    pub earth_reception_time: Option<Epoch>,
}

impl TmPacket {
    #[must_use]
    pub fn new(bytes: Vec<u8>, reception_time: Epoch) -> Self {
        Self {
            bytes,
            reception_time,
            earth_reception_time: None,
        }
    }
}

/// A packet with its generation time and sequence identifier resolved.
///
/// Generation time and sequence identifier together identify a packet within its source.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedPacket {
    #[serde(skip)]
    bytes: Vec<u8>,
    #[serde(serialize_with = "serialize_epoch")]
    generation_time: Epoch,
    sequence_identifier: u32,
    #[serde(serialize_with = "serialize_epoch")]
    reception_time: Epoch,
    #[serde(serialize_with = "serialize_opt_epoch")]
    earth_reception_time: Option<Epoch>,
    corrupted: bool,
    local_generation_time: bool,
}

impl ProcessedPacket {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn generation_time(&self) -> Epoch {
        self.generation_time
    }

    #[must_use]
    pub fn sequence_identifier(&self) -> u32 {
        self.sequence_identifier
    }

    #[must_use]
    pub fn reception_time(&self) -> Epoch {
        self.reception_time
    }

    #[must_use]
    pub fn earth_reception_time(&self) -> Option<Epoch> {
        self.earth_reception_time
    }

    /// The packet failed verification; it is forwarded so the sink can decide what to keep.
    #[must_use]
    pub fn corrupted(&self) -> bool {
        self.corrupted
    }

    /// The generation time is the reception time rather than a time from the packet.
    #[must_use]
    pub fn local_generation_time(&self) -> bool {
        self.local_generation_time
    }
}

/// Values resolved by a preprocessor, combined with the raw packet into a [ProcessedPacket].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stamp {
    pub generation_time: Epoch,
    pub sequence_identifier: u32,
    pub corrupted: bool,
    pub local_generation_time: bool,
}

impl Stamp {
    pub(crate) fn apply(self, packet: TmPacket) -> ProcessedPacket {
        ProcessedPacket {
            bytes: packet.bytes,
            generation_time: self.generation_time,
            sequence_identifier: self.sequence_identifier,
            reception_time: packet.reception_time,
            earth_reception_time: packet.earth_reception_time,
            corrupted: self.corrupted,
            local_generation_time: self.local_generation_time,
        }
    }
}

/// Why a packet was not forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    TooShort { length: usize, minimum: usize },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::TooShort { length, minimum } => {
                write!(f, "packet too short: {length} < {minimum}")
            }
        }
    }
}

/// Outcome of preprocessing a single packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Preprocessed {
    Packet(ProcessedPacket),
    Dropped(DropReason),
}

/// Derives generation time, sequence identifier and integrity of raw packets.
///
/// Malformed input never produces an error: it is either dropped or flagged corrupted.
pub trait PacketPreprocessor: Send + Sync + Debug {
    /// # Errors
    /// Only for unexpected internal failures, which fail the link.
    fn process(&self, packet: TmPacket) -> Result<Preprocessed>;
}

/// Receives preprocessed packets, once per packet, from the link worker thread.
///
/// Implementations must not block for long; hand the packet off to another thread for
/// anything slow.
pub trait TmSink: Send + Sync {
    fn process_packet(&self, packet: ProcessedPacket);
}

impl<S: TmSink + ?Sized> TmSink for Arc<S> {
    fn process_packet(&self, packet: ProcessedPacket) {
        (**self).process_packet(packet);
    }
}

/// Verify the trailing big-endian check word of `buf` against one computed over all preceding
/// bytes. Returns a description of the failure, if any.
pub(crate) fn verify_check_word(alg: &dyn ErrorDetection, buf: &[u8]) -> Option<String> {
    if buf.len() < 2 {
        return Some(format!("no room for a check word in {} bytes", buf.len()));
    }
    let n = buf.len() - 2;
    match alg.compute(buf, 0, n) {
        Ok(computed) => {
            let received = u16::from_be_bytes([buf[n], buf[n + 1]]);
            (computed != received).then(|| {
                format!(
                    "corrupted packet received, computed check word {computed:#06x}, packet \
                     check word {received:#06x}"
                )
            })
        }
        Err(err) => Some(format!("failed to compute check word: {err}")),
    }
}

fn default_true() -> bool {
    true
}

/// Preprocessor selection as it appears in link configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum PreprocessorConfig {
    /// CCSDS packets with the secondary header described in
    /// [crate::spacepacket::secondary]. `errorDetection` defaults to CRC-16-CCIIT; use
    /// `"NONE"` to disable verification.
    #[serde(rename = "CCSDS", rename_all = "camelCase")]
    Ccsds {
        error_detection: Option<ErrorDetectionConfig>,
        time_encoding: Option<TimeEncodingConfig>,
        #[serde(default)]
        use_local_generation_time: bool,
        #[serde(default = "default_true")]
        check_sequence: bool,
    },
    /// Packets with time and sequence count at fixed offsets. A negative `timestampOffset`
    /// uses the reception time, a negative `seqCountOffset` gives every packet sequence 0.
    #[serde(rename = "GENERIC", rename_all = "camelCase")]
    Generic {
        timestamp_offset: i64,
        seq_count_offset: i64,
        error_detection: Option<ErrorDetectionConfig>,
        time_encoding: Option<TimeEncodingConfig>,
        #[serde(default)]
        byte_order: ByteOrder,
    },
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        PreprocessorConfig::Ccsds {
            error_detection: None,
            time_encoding: None,
            use_local_generation_time: false,
            check_sequence: true,
        }
    }
}

impl PreprocessorConfig {
    /// Construct the configured preprocessor. Events are attributed to `source`.
    ///
    /// # Errors
    /// [crate::Error::Config] for invalid error detection or time encoding settings.
    pub fn build(
        &self,
        source: &str,
        events: Arc<dyn EventProducer>,
        counters: SequenceCounters,
    ) -> Result<Box<dyn PacketPreprocessor>> {
        Ok(match self {
            PreprocessorConfig::Ccsds {
                error_detection,
                time_encoding,
                use_local_generation_time,
                check_sequence,
            } => {
                let error_detection = match error_detection {
                    Some(cfg) => cfg.build()?,
                    None => Some(Box::new(Crc16Ccitt::default()) as Box<dyn ErrorDetection>),
                };
                let time_encoding = time_encoding.clone().unwrap_or_default().build()?;
                Box::new(
                    CcsdsPacketPreprocessor::builder()
                        .source(source)
                        .error_detection(error_detection)
                        .time_encoding(time_encoding)
                        .use_local_generation_time(*use_local_generation_time)
                        .check_sequence(*check_sequence)
                        .counters(counters)
                        .events(events)
                        .build(),
                )
            }
            PreprocessorConfig::Generic {
                timestamp_offset,
                seq_count_offset,
                error_detection,
                time_encoding,
                byte_order,
            } => {
                let error_detection = match error_detection {
                    Some(cfg) => cfg.build()?,
                    None => None,
                };
                let time_encoding = time_encoding
                    .clone()
                    .unwrap_or_else(GenericPacketPreprocessor::default_time_encoding)
                    .build()?;
                Box::new(
                    GenericPacketPreprocessor::builder()
                        .source(source)
                        .timestamp_offset(usize::try_from(*timestamp_offset).ok())
                        .seq_count_offset(usize::try_from(*seq_count_offset).ok())
                        .error_detection(error_detection)
                        .time_encoding(time_encoding)
                        .byte_order(*byte_order)
                        .events(events)
                        .build(),
                )
            }
        })
    }
}
