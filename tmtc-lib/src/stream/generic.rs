use std::io::{self, ErrorKind, Read};

use super::{fill, PacketInputStream};
use crate::{bytes::ByteOrder, Error, Result};

/// Parameters of a length-field framed stream.
///
/// The packet length is `raw + length_adjustment`, where `raw` is the unsigned integer in the
/// length field. The emitted packet omits its first `initial_bytes_to_strip` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericFraming {
    length_field_offset: usize,
    length_field_length: usize,
    length_adjustment: i64,
    initial_bytes_to_strip: usize,
    byte_order: ByteOrder,
    max_packet_length: usize,
}

impl GenericFraming {
    /// # Errors
    /// [Error::Config] if `length_field_length` is not 1 to 4.
    pub fn new(
        length_field_offset: usize,
        length_field_length: usize,
        length_adjustment: i64,
        initial_bytes_to_strip: usize,
        byte_order: ByteOrder,
        max_packet_length: usize,
    ) -> Result<Self> {
        if !(1..=4).contains(&length_field_length) {
            return Err(Error::Config(format!(
                "lengthFieldLength must be 1 to 4, got {length_field_length}"
            )));
        }
        Ok(Self {
            length_field_offset,
            length_field_length,
            length_adjustment,
            initial_bytes_to_strip,
            byte_order,
            max_packet_length,
        })
    }

    fn length_field_end(&self) -> usize {
        self.length_field_offset + self.length_field_length
    }
}

fn invalid_data(msg: String) -> Error {
    io::Error::new(ErrorKind::InvalidData, msg).into()
}

/// Frames a stream using a length field at a fixed offset.
pub struct GenericPacketInputStream<R> {
    reader: R,
    framing: GenericFraming,
}

impl<R: Read + Send> GenericPacketInputStream<R> {
    pub fn new(reader: R, framing: GenericFraming) -> Self {
        Self { reader, framing }
    }

    /// Discard `n` bytes from the stream without buffering them.
    fn skip(&mut self, n: usize) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.reader).take(n as u64), &mut io::sink())?;
        if skipped < n as u64 {
            return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }
}

impl<R: Read + Send> PacketInputStream for GenericPacketInputStream<R> {
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let f = self.framing;
        let header_len = f.length_field_end();
        let mut header = vec![0u8; header_len];
        if !fill(&mut self.reader, &mut header)? {
            return Ok(None);
        }

        let raw = f
            .byte_order
            .read_uint(&header[f.length_field_offset..header_len]);
        let length = i64::try_from(raw).unwrap_or(i64::MAX) + f.length_adjustment;
        let Ok(length) = usize::try_from(length) else {
            return Err(invalid_data(format!("negative packet length {length}")));
        };
        if length > f.max_packet_length {
            return Err(Error::PacketTooLong {
                length,
                maximum: f.max_packet_length,
            });
        }
        if length < header_len {
            return Err(invalid_data(format!(
                "packet length {length} shorter than length field end {header_len}"
            )));
        }
        if f.initial_bytes_to_strip > length {
            return Err(invalid_data(format!(
                "packet length {length} shorter than initialBytesToStrip {}",
                f.initial_bytes_to_strip
            )));
        }

        let mut packet = Vec::with_capacity(length - f.initial_bytes_to_strip);
        if f.initial_bytes_to_strip <= header_len {
            packet.extend_from_slice(&header[f.initial_bytes_to_strip..]);
        } else {
            self.skip(f.initial_bytes_to_strip - header_len)?;
        }
        let start = packet.len();
        packet.resize(length - f.initial_bytes_to_strip, 0);
        self.reader.read_exact(&mut packet[start..])?;
        Ok(Some(packet))
    }
}
