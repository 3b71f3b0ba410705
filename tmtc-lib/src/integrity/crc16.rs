use crc::{Crc, CRC_16_IBM_3740};

use super::{checked_range, ErrorDetection};
use crate::Result;

/// x^16 + x^12 + x^5 + 1, MSB first, no final xor.
const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC-16-CCITT with a configurable initial value.
///
/// With the default initial value of `0xFFFF` this is the variant used by the CCSDS TC
/// transfer frame FECF and the PUS packet error control field.
#[derive(Debug, Clone, Copy)]
pub struct Crc16Ccitt {
    initial_value: u16,
}

impl Crc16Ccitt {
    pub const DEFAULT_INITIAL_VALUE: u16 = 0xffff;

    #[must_use]
    pub fn new(initial_value: u16) -> Self {
        Self { initial_value }
    }

    /// CRC over all of `data`.
    #[must_use]
    pub fn checksum(&self, data: &[u8]) -> u16 {
        let mut digest = CRC_CCITT.digest_with_initial(self.initial_value);
        digest.update(data);
        digest.finalize()
    }
}

impl Default for Crc16Ccitt {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL_VALUE)
    }
}

impl ErrorDetection for Crc16Ccitt {
    fn compute(&self, data: &[u8], offset: usize, length: usize) -> Result<u16> {
        Ok(self.checksum(checked_range(data, offset, length)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(Crc16Ccitt::default().checksum(b"123456789"), 0x29b1);
    }

    #[test]
    fn empty_is_initial_value() {
        assert_eq!(Crc16Ccitt::new(0x1d0f).checksum(&[]), 0x1d0f);
    }

    #[test]
    fn offset_and_length() {
        let crc = Crc16Ccitt::default();
        let dat = b"xx123456789yy";
        assert_eq!(crc.compute(dat, 2, 9).unwrap(), 0x29b1);
    }

    #[test]
    fn repeatable() {
        let crc = Crc16Ccitt::default();
        let dat: Vec<u8> = (0..=255u8).collect();
        let first = crc.compute(&dat, 0, dat.len()).unwrap();
        for _ in 0..10 {
            assert_eq!(crc.compute(&dat, 0, dat.len()).unwrap(), first);
        }
    }
}
