use std::io::Read;

use super::{fill, PacketInputStream};
use crate::{
    spacepacket::{packet_length, PrimaryHeader},
    Error, Result,
};

/// Frames a stream of CCSDS space packets using the primary header length field.
pub struct CcsdsPacketInputStream<R> {
    reader: R,
    max_packet_length: usize,
}

impl<R: Read + Send> CcsdsPacketInputStream<R> {
    pub fn new(reader: R, max_packet_length: usize) -> Self {
        Self {
            reader,
            max_packet_length,
        }
    }
}

impl<R: Read + Send> PacketInputStream for CcsdsPacketInputStream<R> {
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let mut hdr = [0u8; PrimaryHeader::LEN];
        if !fill(&mut self.reader, &mut hdr)? {
            return Ok(None);
        }
        let length = packet_length(&hdr);
        if length > self.max_packet_length {
            return Err(Error::PacketTooLong {
                length,
                maximum: self.max_packet_length,
            });
        }
        let mut buf = vec![0u8; length];
        buf[..PrimaryHeader::LEN].copy_from_slice(&hdr);
        self.reader.read_exact(&mut buf[PrimaryHeader::LEN..])?;
        Ok(Some(buf))
    }
}
