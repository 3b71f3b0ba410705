use super::{checked_range, ErrorDetection};
use crate::Result;

/// Largest number of bytes that can be summed into 32-bit accumulators before they must be
/// reduced modulo 255.
const BLOCK_LEN: usize = 5802;

/// ISO 8473 (Fletcher) checksum, "ISO-16".
///
/// The result holds the two check bytes `X << 8 | Y` which, appended to the data, make both
/// Fletcher running sums zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iso16Checksum;

impl Iso16Checksum {
    /// The two Fletcher sums modulo 255.
    #[must_use]
    pub fn sums(data: &[u8]) -> (u32, u32) {
        let mut c0: u32 = 0;
        let mut c1: u32 = 0;
        for block in data.chunks(BLOCK_LEN) {
            for b in block {
                c0 += u32::from(*b);
                c1 += c0;
            }
            c0 %= 255;
            c1 %= 255;
        }
        (c0, c1)
    }
}

impl ErrorDetection for Iso16Checksum {
    fn compute(&self, data: &[u8], offset: usize, length: usize) -> Result<u16> {
        let (c0, c1) = Self::sums(checked_range(data, offset, length)?);
        let x = 255 - (c0 + c1) % 255;
        let y = match c1 {
            0 => 255,
            y => y,
        };
        // both values are <= 255
        Ok(((x as u16) << 8) | y as u16)
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn check_bytes_zero_the_sums() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let len = rng.gen_range(1..512usize);
            let mut dat: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let ck = Iso16Checksum.compute(&dat, 0, len).unwrap();
            dat.extend_from_slice(&ck.to_be_bytes());
            assert_eq!(Iso16Checksum::sums(&dat), (0, 0), "data={dat:?}");
        }
    }

    #[test]
    fn large_buffer_matches_reference() {
        // reduce after every byte as a reference implementation
        let dat: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let (mut r0, mut r1) = (0u32, 0u32);
        for b in &dat {
            r0 = (r0 + u32::from(*b)) % 255;
            r1 = (r1 + r0) % 255;
        }
        assert_eq!(Iso16Checksum::sums(&dat), (r0, r1));
    }

    #[test]
    fn all_ff() {
        let dat = [0xffu8; 1000];
        assert_eq!(Iso16Checksum::sums(&dat), (0, 0));
    }
}
