use super::{checked_range, ErrorDetection};
use crate::{Error, Result};

/// Sum of all big-endian 16-bit words, truncated to 16 bits ("16-SUM").
#[derive(Debug, Clone, Copy, Default)]
pub struct Running16BitChecksum;

impl ErrorDetection for Running16BitChecksum {
    fn compute(&self, data: &[u8], offset: usize, length: usize) -> Result<u16> {
        if length % 2 != 0 {
            return Err(Error::InvalidArgument(format!(
                "16-SUM requires an even number of bytes; got {length}"
            )));
        }
        let dat = checked_range(data, offset, length)?;
        Ok(dat
            .chunks_exact(2)
            .fold(0u16, |sum, w| sum.wrapping_add(u16::from_be_bytes([w[0], w[1]]))))
    }
}
