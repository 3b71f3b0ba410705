use std::io::Read;

use super::{fill, PacketInputStream};
use crate::{Error, Result};

/// Frames a stream into packets of a constant size.
pub struct FixedSizePacketInputStream<R> {
    reader: R,
    packet_size: usize,
}

impl<R: Read + Send> FixedSizePacketInputStream<R> {
    /// # Errors
    /// [Error::Config] if `packet_size` is 0.
    pub fn new(reader: R, packet_size: usize) -> Result<Self> {
        if packet_size == 0 {
            return Err(Error::Config("packetSize must be positive".to_string()));
        }
        Ok(Self {
            reader,
            packet_size,
        })
    }
}

impl<R: Read + Send> PacketInputStream for FixedSizePacketInputStream<R> {
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.packet_size];
        if !fill(&mut self.reader, &mut buf)? {
            return Ok(None);
        }
        Ok(Some(buf))
    }
}
