//! Secondary header layout used by the CCSDS packet pre/post-processors.
//!
//! ```text
//! offset  6..10  coarse time, seconds (CUC, 4 bytes)
//! offset 10      fine time, 1/256 seconds (CUC, 1 byte)
//! offset 11      flags; bit 0x20 is the checksum indicator
//! offset 12..16  packet id
//! ```
//!
//! When the checksum indicator is set the last two bytes of the packet hold an error detection
//! word computed over all preceding bytes.
use super::{has_secondary_header, PrimaryHeader};

/// Length of the secondary header.
pub const LEN: usize = 10;
/// Offset of the CUC time field.
pub const TIME_OFFSET: usize = PrimaryHeader::LEN;
/// Length of the CUC time field, coarse + fine.
pub const TIME_LEN: usize = 5;
/// Minimum length of a packet with a full primary and secondary header.
pub const MIN_PACKET_LEN: usize = PrimaryHeader::LEN + LEN;

const FLAGS_OFFSET: usize = 11;
const CHECKSUM_INDICATOR: u8 = 0x20;

/// The 4-byte coarse and 1-byte fine CUC time fields.
#[must_use]
pub fn cuc_time(buf: &[u8]) -> (u32, u8) {
    let coarse = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
    (coarse, buf[10])
}

pub fn set_cuc_time(buf: &mut [u8], coarse: u32, fine: u8) {
    buf[6..10].copy_from_slice(&coarse.to_be_bytes());
    buf[10] = fine;
}

#[must_use]
pub fn checksum_indicator(buf: &[u8]) -> bool {
    buf[FLAGS_OFFSET] & CHECKSUM_INDICATOR != 0
}

pub fn set_checksum_indicator(buf: &mut [u8], present: bool) {
    if present {
        buf[FLAGS_OFFSET] |= CHECKSUM_INDICATOR;
    } else {
        buf[FLAGS_OFFSET] &= !CHECKSUM_INDICATOR;
    }
}

/// True if `buf` has a secondary header that is long enough to carry the flags byte and the
/// checksum indicator is set.
///
/// Unlike the other accessors this is safe to call on any buffer of at least
/// [PrimaryHeader::LEN] bytes.
#[must_use]
pub fn has_checksum(buf: &[u8]) -> bool {
    has_secondary_header(buf) && buf.len() > FLAGS_OFFSET && checksum_indicator(buf)
}
