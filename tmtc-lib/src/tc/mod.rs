//! Outbound telecommands: postprocessing, command history and routing.
mod ccsds;
mod generic;
mod history;
mod router;

use std::{fmt::Debug, sync::Arc};

use hifitime::Epoch;
use serde::{Deserialize, Serialize};

pub use ccsds::CcsdsCommandPostprocessor;
pub use generic::GenericCommandPostprocessor;
pub use history::LogCommandHistory;
pub use router::CommandRouter;

use crate::{
    integrity::{Crc16Ccitt, ErrorDetection, ErrorDetectionConfig},
    spacepacket::SequenceCounters,
    timecode::{serialize_epoch, TimeEncodingConfig},
    Result,
};

/// Name of the acknowledgement published when a command has been written to a transport.
pub const ACK_SENT: &str = "Acknowledge_Sent";
/// Command history attribute holding the assigned sequence count.
pub const ATTR_SEQCOUNT: &str = "ccsds-seqcount";
/// Command history attribute holding the computed check word.
pub const ATTR_CHECKSUM: &str = "checksum";
/// Command history attribute holding the final binary.
pub const ATTR_BINARY: &str = "binary";

/// Identifies a command across the system.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandId {
    pub origin: String,
    pub sequence_number: u32,
    #[serde(serialize_with = "serialize_epoch")]
    pub generation_time: Epoch,
    pub command_name: String,
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.command_name, self.origin, self.sequence_number
        )
    }
}

/// A command ready for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCommand {
    pub id: CommandId,
    pub binary: Vec<u8>,
    /// Send `binary` as is, skipping postprocessing.
    pub disable_postprocessing: bool,
}

impl PreparedCommand {
    #[must_use]
    pub fn new(id: CommandId, binary: Vec<u8>) -> Self {
        Self {
            id,
            binary,
            disable_postprocessing: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckStatus {
    Ok,
    Nok,
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AckStatus::Ok => "OK",
            AckStatus::Nok => "NOK",
        })
    }
}

/// Value of a command history attribute.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Text(String),
    Binary(Vec<u8>),
}

/// Receives the lifecycle of commands.
pub trait CommandHistoryPublisher: Send + Sync + Debug {
    fn publish_ack(
        &self,
        id: &CommandId,
        name: &str,
        time: Epoch,
        status: AckStatus,
        reason: Option<&str>,
    );

    fn command_failed(&self, id: &CommandId, time: Epoch, reason: &str);

    /// Publish an attribute of a command.
    fn publish(&self, id: &CommandId, key: &str, value: AttrValue);
}

impl<P: CommandHistoryPublisher + ?Sized> CommandHistoryPublisher for Arc<P> {
    fn publish_ack(
        &self,
        id: &CommandId,
        name: &str,
        time: Epoch,
        status: AckStatus,
        reason: Option<&str>,
    ) {
        (**self).publish_ack(id, name, time, status, reason);
    }

    fn command_failed(&self, id: &CommandId, time: Epoch, reason: &str) {
        (**self).command_failed(id, time, reason);
    }

    fn publish(&self, id: &CommandId, key: &str, value: AttrValue) {
        (**self).publish(id, key, value);
    }
}

/// Turns a [PreparedCommand] into the bytes written to a transport.
pub trait CommandPostprocessor: Send + Sync + Debug {
    /// Returns `None` if the command must not be sent; the caller fails it.
    fn process(&self, command: &PreparedCommand) -> Option<Vec<u8>>;
}

/// A link that accepts commands.
pub trait TcLink: Send + Sync {
    /// Hand `command` to this link.
    ///
    /// Returns `false` if the link cannot take commands right now, in which case nothing has
    /// been published to command history and another link may be tried. Returns `true` once
    /// the link has taken responsibility for the command, whether it is eventually sent or
    /// failed.
    fn send_command(&self, command: PreparedCommand) -> bool;
}

/// Postprocessor selection as it appears in link configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum PostprocessorConfig {
    /// `errorDetection` defaults to CRC-16-CCIIT; the time encoding epoch is used for the
    /// generation time written into the secondary header.
    #[serde(rename = "CCSDS", rename_all = "camelCase")]
    Ccsds {
        error_detection: Option<ErrorDetectionConfig>,
        #[serde(default)]
        minimum_tc_packet_length: usize,
        #[serde(default)]
        enforce_even_number_of_bytes: bool,
        time_encoding: Option<TimeEncodingConfig>,
    },
    /// Appends a check word when `errorDetection` is configured.
    #[serde(rename = "GENERIC", rename_all = "camelCase")]
    Generic {
        error_detection: Option<ErrorDetectionConfig>,
    },
}

impl Default for PostprocessorConfig {
    fn default() -> Self {
        PostprocessorConfig::Ccsds {
            error_detection: None,
            minimum_tc_packet_length: 0,
            enforce_even_number_of_bytes: false,
            time_encoding: None,
        }
    }
}

impl PostprocessorConfig {
    /// Construct the configured postprocessor. `source` names the link in log messages.
    ///
    /// # Errors
    /// [crate::Error::Config] for invalid error detection or time encoding settings.
    pub fn build(
        &self,
        source: &str,
        history: Arc<dyn CommandHistoryPublisher>,
        counters: SequenceCounters,
    ) -> Result<Box<dyn CommandPostprocessor>> {
        Ok(match self {
            PostprocessorConfig::Ccsds {
                error_detection,
                minimum_tc_packet_length,
                enforce_even_number_of_bytes,
                time_encoding,
            } => {
                let error_detection = match error_detection {
                    Some(cfg) => cfg.build()?,
                    None => Some(Box::new(Crc16Ccitt::default()) as Box<dyn ErrorDetection>),
                };
                let epoch = time_encoding.clone().unwrap_or_default().build()?.epoch;
                Box::new(
                    CcsdsCommandPostprocessor::builder()
                        .source(source)
                        .error_detection(error_detection)
                        .minimum_length(*minimum_tc_packet_length)
                        .enforce_even_length(*enforce_even_number_of_bytes)
                        .epoch(epoch)
                        .counters(counters)
                        .history(history)
                        .build(),
                )
            }
            PostprocessorConfig::Generic { error_detection } => {
                let error_detection = match error_detection {
                    Some(cfg) => cfg.build()?,
                    None => None,
                };
                Box::new(
                    GenericCommandPostprocessor::builder()
                        .source(source)
                        .error_detection(error_detection)
                        .history(history)
                        .build(),
                )
            }
        })
    }
}
