//! CCSDS Space Packet header codec.
//!
//! The free functions in this module read and write individual primary header fields directly
//! in a packet buffer, which is how both the preprocessing and postprocessing pipelines work on
//! packets without decoding them into an intermediate structure.
//!
//! References:
//! * CCSDS Space Packet Protocol 133.0-B-2
//!
//! # Panics
//! The field accessors index into the buffer without checking its length. Callers must ensure
//! the buffer holds at least [PrimaryHeader::LEN] bytes (and the secondary header for the
//! functions in [secondary]) before using them.
pub mod secondary;
mod sequence;

use serde::{Deserialize, Serialize};

pub use sequence::*;

pub type Apid = u16;

/// Packet is the first packet in a packet group
pub const SEQ_FIRST: u8 = 1;
/// Packet is a part of a packet group, but not first and not last
pub const SEQ_CONTINUATION: u8 = 0;
/// Packet is the last packet in a packet group
pub const SEQ_LAST: u8 = 2;
/// Packet is not part of a packet group, i.e., standalone.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// Packet type flag value for telemetry
pub const TYPE_TM: u8 = 0;
/// Packet type flag value for telecommands
pub const TYPE_TC: u8 = 1;

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets.
///
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Defines a packets grouping. See the `SEQ_*` values.
    pub sequence_flags: u8,
    pub sequence_id: u16,
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;
    pub const APID_MAX: Apid = 0x7ff;
    /// Number of bytes not counted by the packet length field, i.e., the header plus one.
    pub const LEN_OFFSET: usize = Self::LEN + 1;

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf: &[u8; Self::LEN] = buf.get(..Self::LEN)?.try_into().ok()?;
        Some(Self::decode_array(buf))
    }

    fn decode_array(buf: &[u8; Self::LEN]) -> Self {
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: (d2 >> 14 & 0x3) as u8,
            sequence_id: (d2 & 0x3fff),
            len_minus1: d3,
        }
    }

    /// Encode into the 6 primary header bytes. Out of range field values are masked.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let d1 = (u16::from(self.version & 0x7) << 13)
            | (u16::from(self.type_flag & 0x1) << 12)
            | (u16::from(self.has_secondary_header) << 11)
            | (self.apid & Self::APID_MAX);
        let d2 = (u16::from(self.sequence_flags & 0x3) << 14) | (self.sequence_id & Self::SEQ_MAX);
        let mut buf = [0u8; Self::LEN];
        buf[..2].copy_from_slice(&d1.to_be_bytes());
        buf[2..4].copy_from_slice(&d2.to_be_bytes());
        buf[4..].copy_from_slice(&self.len_minus1.to_be_bytes());
        buf
    }

    /// Total packet length indicated by this header, including the header itself.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        self.len_minus1 as usize + Self::LEN_OFFSET
    }
}

#[must_use]
pub fn version(buf: &[u8]) -> u8 {
    buf[0] >> 5
}

#[must_use]
pub fn packet_type(buf: &[u8]) -> u8 {
    (buf[0] >> 4) & 0x1
}

pub fn set_packet_type(buf: &mut [u8], type_flag: u8) {
    buf[0] = (buf[0] & 0xef) | ((type_flag & 0x1) << 4);
}

#[must_use]
pub fn has_secondary_header(buf: &[u8]) -> bool {
    buf[0] & 0x08 != 0
}

pub fn set_secondary_header_flag(buf: &mut [u8], present: bool) {
    buf[0] = (buf[0] & 0xf7) | (u8::from(present) << 3);
}

#[must_use]
pub fn apid(buf: &[u8]) -> Apid {
    u16::from_be_bytes([buf[0], buf[1]]) & PrimaryHeader::APID_MAX
}

pub fn set_apid(buf: &mut [u8], apid: Apid) {
    let apid = apid & PrimaryHeader::APID_MAX;
    buf[0] = (buf[0] & 0xf8) | (apid >> 8) as u8;
    buf[1] = (apid & 0xff) as u8;
}

#[must_use]
pub fn sequence_flags(buf: &[u8]) -> u8 {
    buf[2] >> 6
}

pub fn set_sequence_flags(buf: &mut [u8], flags: u8) {
    buf[2] = (buf[2] & 0x3f) | ((flags & 0x3) << 6);
}

#[must_use]
pub fn sequence_count(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[2], buf[3]]) & PrimaryHeader::SEQ_MAX
}

/// Write the 14-bit sequence count, leaving the sequence flags untouched.
pub fn set_sequence_count(buf: &mut [u8], seq: u16) {
    let seq = seq & PrimaryHeader::SEQ_MAX;
    buf[2] = (buf[2] & 0xc0) | (seq >> 8) as u8;
    buf[3] = (seq & 0xff) as u8;
}

/// The raw packet data length field, i.e., the number of bytes after the primary header
/// minus one.
#[must_use]
pub fn data_length(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[4], buf[5]])
}

pub fn set_data_length(buf: &mut [u8], len_minus1: u16) {
    buf[4..6].copy_from_slice(&len_minus1.to_be_bytes());
}

/// Total packet length declared by the header, i.e., the length field plus 7.
#[must_use]
pub fn packet_length(buf: &[u8]) -> usize {
    data_length(buf) as usize + PrimaryHeader::LEN_OFFSET
}

/// Sets the length field to match the length of `buf`.
///
/// # Panics
/// If `buf` is shorter than 7 bytes or longer than 65542 bytes.
pub fn update_data_length(buf: &mut [u8]) {
    let len_minus1 = u16::try_from(buf.len() - PrimaryHeader::LEN_OFFSET)
        .expect("packet length must fit the 16-bit length field");
    set_data_length(buf, len_minus1);
}

/// Write a complete primary header (version 0) into the first 6 bytes of `buf`, with the
/// length field derived from the length of `buf`.
///
/// # Panics
/// If `buf` is shorter than 7 bytes or longer than 65542 bytes.
pub fn set_header(
    buf: &mut [u8],
    apid: Apid,
    type_flag: u8,
    has_secondary_header: bool,
    sequence_flags: u8,
    sequence_id: u16,
) {
    let header = PrimaryHeader {
        version: 0,
        type_flag,
        has_secondary_header,
        apid,
        sequence_flags,
        sequence_id,
        len_minus1: 0,
    };
    buf[..PrimaryHeader::LEN].copy_from_slice(&header.encode());
    update_data_length(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_header_fields() {
        // header of a 2710 byte TM packet followed by the first data byte
        let dat = [0x0d, 0x59, 0xd2, 0xab, 0x0a, 0x8f, 0xff];
        let ph = PrimaryHeader::decode(&dat).unwrap();

        assert_eq!(ph.version, 0);
        assert_eq!(ph.type_flag, 0);
        assert!(ph.has_secondary_header);
        assert_eq!(ph.apid, 1369);
        assert_eq!(ph.sequence_flags, 3);
        assert_eq!(ph.sequence_id, 4779);
        assert_eq!(ph.len_minus1, 2703);
        assert_eq!(ph.packet_len(), 2710);
    }

    #[test]
    fn decode_too_short() {
        assert!(PrimaryHeader::decode(&[0u8; 5]).is_none());
    }

    #[test]
    fn encode_decode() {
        let dat: [u8; 6] = [0xd, 0x59, 0xd2, 0xab, 0xa, 0x8f];
        let ph = PrimaryHeader::decode(&dat).unwrap();
        assert_eq!(ph.encode(), dat);
    }

    #[test]
    fn field_accessors_match_decode() {
        let dat: [u8; 6] = [0xd, 0x59, 0xd2, 0xab, 0xa, 0x8f];
        assert_eq!(version(&dat), 0);
        assert_eq!(packet_type(&dat), 0);
        assert!(has_secondary_header(&dat));
        assert_eq!(apid(&dat), 1369);
        assert_eq!(sequence_flags(&dat), 3);
        assert_eq!(sequence_count(&dat), 4779);
        assert_eq!(data_length(&dat), 2703);
        assert_eq!(packet_length(&dat), 2710);
    }

    #[test]
    fn set_header_round_trip() {
        let mut buf = [0u8; 20];
        set_header(&mut buf, 0x123, 1, true, 0b10, 42);

        assert_eq!(apid(&buf), 0x123);
        assert_eq!(packet_type(&buf), 1);
        assert!(has_secondary_header(&buf));
        assert_eq!(sequence_flags(&buf), 0b10);
        assert_eq!(sequence_count(&buf), 42);
        assert_eq!(data_length(&buf), 13);
        assert_eq!(packet_length(&buf), 20);
        assert_eq!(version(&buf), 0);
    }

    #[test]
    fn setters_leave_other_fields_alone() {
        let mut buf = [0xffu8; 8];
        set_apid(&mut buf, 0);
        assert_eq!(buf[0], 0xf8);
        assert_eq!(buf[1], 0);

        let mut buf = [0xffu8; 8];
        set_sequence_count(&mut buf, 0);
        assert_eq!(sequence_flags(&buf), 3);
        assert_eq!(sequence_count(&buf), 0);

        set_sequence_flags(&mut buf, SEQ_FIRST);
        assert_eq!(sequence_flags(&buf), SEQ_FIRST);
        assert_eq!(sequence_count(&buf), 0);

        set_packet_type(&mut buf, TYPE_TM);
        assert_eq!(packet_type(&buf), TYPE_TM);
        assert!(has_secondary_header(&buf));
        set_secondary_header_flag(&mut buf, false);
        assert!(!has_secondary_header(&buf));
        assert_eq!(apid(&buf), PrimaryHeader::APID_MAX);
    }

    #[test]
    fn sequence_count_is_masked() {
        let mut buf = [0u8; 6];
        set_sequence_count(&mut buf, 0xffff);
        assert_eq!(sequence_count(&buf), PrimaryHeader::SEQ_MAX);
        assert_eq!(sequence_flags(&buf), 0);
    }
}
