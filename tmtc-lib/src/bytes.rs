use serde::{Deserialize, Serialize};

/// Byte order of multi-byte integer fields.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Decode an unsigned integer of up to 8 bytes.
    ///
    /// # Panics
    /// If `bytes` is longer than 8 bytes.
    #[must_use]
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        assert!(bytes.len() <= 8, "integer fields are at most 8 bytes");
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        match self {
            ByteOrder::BigEndian => bytes.iter().fold(0, fold),
            ByteOrder::LittleEndian => bytes.iter().rev().fold(0, fold),
        }
    }

    #[must_use]
    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        }
    }

    #[must_use]
    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_uint() {
        let dat = [0x01, 0x02, 0x03];
        assert_eq!(ByteOrder::BigEndian.read_uint(&dat), 0x010203);
        assert_eq!(ByteOrder::LittleEndian.read_uint(&dat), 0x030201);
        assert_eq!(ByteOrder::BigEndian.read_uint(&[]), 0);
    }

    #[test]
    fn u16_round_trip() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            assert_eq!(order.read_u16(order.u16_bytes(0xabcd)), 0xabcd);
        }
        assert_eq!(ByteOrder::LittleEndian.u16_bytes(0xabcd), [0xcd, 0xab]);
    }

    #[test]
    fn deserialize() {
        let order: ByteOrder = serde_json::from_str("\"LITTLE_ENDIAN\"").unwrap();
        assert_eq!(order, ByteOrder::LittleEndian);
    }
}
