//! Error detection words used to verify incoming packets and stamp outgoing commands.
//!
//! All algorithms compute a 16-bit check word over `data[offset..offset + length]` and are
//! stateless, so a single instance may be shared between threads.
mod crc16;
mod iso16;
mod running_sum;

pub use crc16::*;
pub use iso16::*;
pub use running_sum::*;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub trait ErrorDetection: Send + Sync + std::fmt::Debug {
    /// Compute the check word over `length` bytes of `data` starting at `offset`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if the range is outside `data`, or [Error::InvalidArgument] if the
    /// algorithm cannot be applied to the range.
    fn compute(&self, data: &[u8], offset: usize, length: usize) -> Result<u16>;
}

/// Checks that `offset..offset + length` is within `data` and returns the slice.
pub(crate) fn checked_range(data: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
    let end = offset.checked_add(length).ok_or_else(|| {
        Error::InvalidArgument(format!("offset {offset} + length {length} overflows"))
    })?;
    if end > data.len() {
        return Err(Error::NotEnoughData {
            actual: data.len(),
            minimum: end,
        });
    }
    Ok(&data[offset..end])
}

/// Error detection selection as it appears in link configuration.
///
/// Either just the algorithm name, e.g. `"errorDetection": "CRC-16-CCIIT"`, or a map with a
/// `type` and algorithm specific options:
/// `"errorDetection": {"type": "CRC-16-CCIIT", "initialValue": 0}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetectionConfig {
    Name(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        initial_value: Option<u16>,
    },
}

impl ErrorDetectionConfig {
    /// Construct the configured algorithm, or `None` for `NONE`.
    ///
    /// # Errors
    /// [Error::Config] for an unknown algorithm name.
    pub fn build(&self) -> Result<Option<Box<dyn ErrorDetection>>> {
        let (kind, initial_value) = match self {
            Self::Name(kind) => (kind.as_str(), None),
            Self::Detailed {
                kind,
                initial_value,
            } => (kind.as_str(), *initial_value),
        };

        let alg: Box<dyn ErrorDetection> = match kind.to_ascii_uppercase().as_str() {
            "16-SUM" => Box::new(Running16BitChecksum),
            "CRC-16-CCIIT" => Box::new(Crc16Ccitt::new(
                initial_value.unwrap_or(Crc16Ccitt::DEFAULT_INITIAL_VALUE),
            )),
            "ISO-16" => Box::new(Iso16Checksum),
            "NONE" => return Ok(None),
            _ => {
                return Err(Error::Config(format!(
                    "unknown errorDetection type '{kind}'; supported types are 16-SUM, \
                     CRC-16-CCIIT and ISO-16 (or NONE)"
                )))
            }
        };
        Ok(Some(alg))
    }
}
