//! Packet framing over byte streams.
//!
//! A [PacketInputStream] turns a blocking byte stream into discrete packets. Which framing is
//! used is selected with a [PacketInputConfig]:
//!
//! ```json
//! {"type": "GENERIC", "lengthFieldOffset": 4, "lengthFieldLength": 2, "lengthAdjustment": 7, "initialBytesToStrip": 0}
//! ```
mod ccsds;
mod fixed;
mod generic;

use std::io::{ErrorKind, Read};

use serde::{Deserialize, Serialize};

pub use ccsds::CcsdsPacketInputStream;
pub use fixed::FixedSizePacketInputStream;
pub use generic::{GenericFraming, GenericPacketInputStream};

use crate::{bytes::ByteOrder, Error, Result};

/// Default upper bound on the length of a framed packet.
pub const DEFAULT_MAX_PACKET_LENGTH: usize = 1500;

/// Reads packets from a byte stream.
pub trait PacketInputStream: Send {
    /// Block until a complete packet is available.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a packet boundary.
    ///
    /// # Errors
    /// [Error::Io] with [ErrorKind::UnexpectedEof] if the stream ends mid-packet, or any other
    /// read error. [Error::PacketTooLong] if the packet length exceeds the configured maximum.
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>>;

    /// Iterate over the packets of this stream. Iteration ends at end of stream or after the
    /// first error.
    fn packets(self) -> Packets<Self>
    where
        Self: Sized,
    {
        Packets {
            stream: self,
            done: false,
        }
    }
}

impl<S: PacketInputStream + ?Sized> PacketInputStream for Box<S> {
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).read_packet()
    }
}

/// Iterator returned by [PacketInputStream::packets].
pub struct Packets<S> {
    stream: S,
    done: bool,
}

impl<S: PacketInputStream> Iterator for Packets<S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stream.read_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Fill `buf` from `reader`.
///
/// Returns `Ok(false)` if the reader is at end of stream before the first byte, which is the
/// only place a stream may end cleanly.
pub(crate) fn fill<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

/// Framing configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PacketInputConfig {
    /// Packet length implied by the CCSDS primary header.
    #[serde(rename = "CCSDS", rename_all = "camelCase")]
    Ccsds {
        #[serde(default = "default_max_packet_length")]
        max_packet_length: usize,
    },
    /// Every packet is `packetSize` bytes.
    #[serde(rename = "FIXED_SIZE", rename_all = "camelCase")]
    FixedSize { packet_size: usize },
    /// Packet length read from a length field at a configurable position. The first four
    /// fields are mandatory.
    #[serde(rename = "GENERIC", rename_all = "camelCase")]
    Generic {
        length_field_offset: Option<usize>,
        length_field_length: Option<usize>,
        length_adjustment: Option<i64>,
        initial_bytes_to_strip: Option<usize>,
        #[serde(default)]
        byte_order: ByteOrder,
        #[serde(default = "default_max_packet_length")]
        max_packet_length: usize,
    },
}

fn default_max_packet_length() -> usize {
    DEFAULT_MAX_PACKET_LENGTH
}

impl Default for PacketInputConfig {
    fn default() -> Self {
        PacketInputConfig::Ccsds {
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
        }
    }
}

fn required<T: Copy>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| Error::Config(format!("GENERIC packet input requires {name}")))
}

impl PacketInputConfig {
    /// Check the configuration without constructing a stream.
    ///
    /// # Errors
    /// [Error::Config] for missing mandatory or out of range parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            PacketInputConfig::Ccsds { max_packet_length } => {
                if *max_packet_length < crate::spacepacket::PrimaryHeader::LEN_OFFSET {
                    return Err(Error::Config(format!(
                        "maxPacketLength too small: {max_packet_length}"
                    )));
                }
            }
            PacketInputConfig::FixedSize { packet_size } => {
                if *packet_size == 0 {
                    return Err(Error::Config("packetSize must be positive".to_string()));
                }
            }
            PacketInputConfig::Generic { .. } => {
                self.generic_framing()?;
            }
        }
        Ok(())
    }

    fn generic_framing(&self) -> Result<GenericFraming> {
        let PacketInputConfig::Generic {
            length_field_offset,
            length_field_length,
            length_adjustment,
            initial_bytes_to_strip,
            byte_order,
            max_packet_length,
        } = self
        else {
            return Err(Error::Config("not a GENERIC packet input".to_string()));
        };
        GenericFraming::new(
            required(*length_field_offset, "lengthFieldOffset")?,
            required(*length_field_length, "lengthFieldLength")?,
            required(*length_adjustment, "lengthAdjustment")?,
            required(*initial_bytes_to_strip, "initialBytesToStrip")?,
            *byte_order,
            *max_packet_length,
        )
    }

    /// Construct a stream framing packets read from `reader`.
    ///
    /// # Errors
    /// See [PacketInputConfig::validate].
    pub fn build<R>(&self, reader: R) -> Result<Box<dyn PacketInputStream>>
    where
        R: Read + Send + 'static,
    {
        self.validate()?;
        Ok(match self {
            PacketInputConfig::Ccsds { max_packet_length } => {
                Box::new(CcsdsPacketInputStream::new(reader, *max_packet_length))
            }
            PacketInputConfig::FixedSize { packet_size } => {
                Box::new(FixedSizePacketInputStream::new(reader, *packet_size)?)
            }
            PacketInputConfig::Generic { .. } => Box::new(GenericPacketInputStream::new(
                reader,
                self.generic_framing()?,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn fill_distinguishes_clean_eof() {
        let mut buf = [0u8; 4];
        assert!(!fill(&mut Cursor::new(vec![]), &mut buf).unwrap());
        assert!(fill(&mut Cursor::new(vec![1, 2, 3, 4, 5]), &mut buf).unwrap());
        let err = fill(&mut Cursor::new(vec![1, 2]), &mut buf).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == ErrorKind::UnexpectedEof));
    }

    #[test]
    fn default_is_ccsds() {
        let cfg: PacketInputConfig = serde_json::from_str(r#"{"type": "CCSDS"}"#).unwrap();
        assert_eq!(cfg, PacketInputConfig::default());
    }

    #[test]
    fn generic_requires_all_mandatory_fields() {
        let cfg: PacketInputConfig = serde_json::from_str(
            r#"{"type": "GENERIC", "lengthFieldOffset": 4, "lengthFieldLength": 2, "lengthAdjustment": 7}"#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(
            matches!(&err, Error::Config(msg) if msg.contains("initialBytesToStrip")),
            "{err:?}"
        );
        assert!(cfg.build(Cursor::new(vec![])).is_err());
    }

    #[test]
    fn fixed_size_must_be_positive() {
        let cfg = PacketInputConfig::FixedSize { packet_size: 0 };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn packets_iterates_until_eof() {
        let cfg = PacketInputConfig::FixedSize { packet_size: 2 };
        let stream = cfg.build(Cursor::new(vec![1, 2, 3, 4])).unwrap();
        let packets: Vec<_> = stream.packets().collect::<Result<_>>().unwrap();
        assert_eq!(packets, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn packets_stops_after_error() {
        let cfg = PacketInputConfig::FixedSize { packet_size: 2 };
        let stream = cfg.build(Cursor::new(vec![1, 2, 3])).unwrap();
        let results: Vec<_> = stream.packets().collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }
}
