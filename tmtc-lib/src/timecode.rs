//! Time code decoding and encoding.
//!
//! A time code in a packet is decoded into a [Duration] relative to a [TimeEpoch], which then
//! resolves it into an absolute [hifitime::Epoch].
//!
//! Reference: [CCSDS Time Code Formats](https://public.ccsds.org/Pubs/301x0b4e1.pdf)
use std::{
    fmt::Debug,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use hifitime::{Duration, Epoch};
use serde::{Deserialize, Serialize, Serializer};

use crate::{bytes::ByteOrder, Error, Result};

/// Number of seconds between 1900 and 1958
const CCSDS_HIFIEPOCH_DELTA_SECS: i128 = 1_830_297_600;
/// Number of seconds between 1900 and 1970
const UNIX_HIFIEPOCH_DELTA_SECS: i128 = 2_208_988_800;
const NANOS_PER_SEC: i128 = 1_000_000_000;

/// P-field for 4 coarse and 1 fine octets, the layout of the packet secondary header.
pub const CUC_4_1_PFIELD: u8 = 0x1d;

fn seconds(secs: i128) -> Duration {
    Duration::from_total_nanoseconds(secs * NANOS_PER_SEC)
}

/// Reference epoch of a time code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeEpoch {
    /// 1958-01-01T00:00:00 TAI
    Tai,
    /// 2000-01-01T11:58:55.816 UTC
    J2000,
    /// 1970-01-01T00:00:00 UTC, counting without leap seconds
    Unix,
    /// 1980-01-06T00:00:00 UTC
    Gps,
    /// Agency defined epoch. When `includes_leap_seconds` is false the time code counts like
    /// UNIX time, i.e., leap seconds are not counted.
    Custom {
        epoch: Epoch,
        includes_leap_seconds: bool,
    },
}

impl TimeEpoch {
    /// Duration of the reference, either from 1900 TAI for continuous scales or 1900 UTC for
    /// scales that do not count leap seconds.
    fn reference(&self) -> (Duration, bool) {
        match self {
            TimeEpoch::Tai => (seconds(CCSDS_HIFIEPOCH_DELTA_SECS), true),
            TimeEpoch::J2000 => (
                Epoch::from_gregorian_tai(2000, 1, 1, 11, 59, 27, 816_000_000).to_tai_duration(),
                true,
            ),
            TimeEpoch::Gps => (
                Epoch::from_gregorian_tai(1980, 1, 6, 0, 0, 19, 0).to_tai_duration(),
                true,
            ),
            TimeEpoch::Unix => (seconds(UNIX_HIFIEPOCH_DELTA_SECS), false),
            TimeEpoch::Custom {
                epoch,
                includes_leap_seconds: true,
            } => (epoch.to_tai_duration(), true),
            TimeEpoch::Custom {
                epoch,
                includes_leap_seconds: false,
            } => (epoch.to_utc_duration(), false),
        }
    }

    /// Absolute time of `offset` after this epoch.
    #[must_use]
    pub fn to_epoch(&self, offset: Duration) -> Epoch {
        match self.reference() {
            (base, true) => Epoch::from_tai_duration(base + offset),
            (base, false) => Epoch::from_utc_duration(base + offset),
        }
    }

    /// Time elapsed between this epoch and `time`; the inverse of [TimeEpoch::to_epoch].
    #[must_use]
    pub fn offset_of(&self, time: Epoch) -> Duration {
        match self.reference() {
            (base, true) => time.to_tai_duration() - base,
            (base, false) => time.to_utc_duration() - base,
        }
    }
}

/// Decodes a binary time code into the time elapsed since the code's epoch.
pub trait TimeDecoder: Send + Sync + Debug {
    /// Decode the time code at the start of `buf`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `buf` is too short for the code, [Error::Timecode] if the
    /// code cannot be represented.
    fn decode(&self, buf: &[u8]) -> Result<Duration>;
}

/// CCSDS Unsegmented Time Code.
///
/// With an implicit P-field the layout is fixed by configuration, otherwise the P-field is the
/// first byte of the code. Extended P-fields are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CucTimeDecoder {
    pfield: Option<u8>,
}

impl CucTimeDecoder {
    /// Decoder for codes whose layout is described by `pfield` rather than carried with them.
    #[must_use]
    pub fn implicit(pfield: u8) -> Self {
        Self {
            pfield: Some(pfield),
        }
    }

    /// Decoder for codes that begin with their P-field.
    #[must_use]
    pub fn explicit() -> Self {
        Self { pfield: None }
    }

    /// Number of coarse and fine octets described by `pfield`.
    fn layout(pfield: u8) -> Result<(usize, usize)> {
        if pfield & 0x80 != 0 {
            return Err(Error::Timecode(format!(
                "extended CUC P-field not supported: {pfield:#04x}"
            )));
        }
        Ok((1 + usize::from((pfield >> 2) & 0x3), usize::from(pfield & 0x3)))
    }
}

impl TimeDecoder for CucTimeDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Duration> {
        let (pfield, buf) = match self.pfield {
            Some(p) => (p, buf),
            None => match buf.split_first() {
                Some((p, rest)) => (*p, rest),
                None => {
                    return Err(Error::NotEnoughData {
                        actual: 0,
                        minimum: 1,
                    })
                }
            },
        };
        let (num_coarse, num_fine) = Self::layout(pfield)?;
        if buf.len() < num_coarse + num_fine {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: num_coarse + num_fine,
            });
        }
        let (coarse, rest) = buf.split_at(num_coarse);
        let coarse = ByteOrder::BigEndian.read_uint(coarse);
        let fine = ByteOrder::BigEndian.read_uint(&rest[..num_fine]);

        let fine_nanos = (i128::from(fine) * NANOS_PER_SEC) >> (8 * num_fine);
        Ok(Duration::from_total_nanoseconds(
            i128::from(coarse) * NANOS_PER_SEC + fine_nanos,
        ))
    }
}

/// Unsigned integer of 4 or 8 bytes, scaled by `multiplier` to get seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedTimeDecoder {
    size: usize,
    multiplier: f64,
    byte_order: ByteOrder,
}

impl FixedTimeDecoder {
    /// # Errors
    /// [Error::Config] if `size` is not 4 or 8.
    pub fn new(size: usize, multiplier: f64, byte_order: ByteOrder) -> Result<Self> {
        if size != 4 && size != 8 {
            return Err(Error::Config(format!(
                "fixed time code size must be 4 or 8, got {size}"
            )));
        }
        Ok(Self {
            size,
            multiplier,
            byte_order,
        })
    }
}

impl TimeDecoder for FixedTimeDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Duration> {
        let Some(raw) = buf.get(..self.size) else {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: self.size,
            });
        };
        let raw = self.byte_order.read_uint(raw);
        if (self.multiplier - 1.0).abs() < f64::EPSILON {
            return Ok(seconds(i128::from(raw)));
        }
        Ok(Duration::from_seconds(raw as f64 * self.multiplier))
    }
}

/// IEEE 754 double holding seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Float64TimeDecoder {
    byte_order: ByteOrder,
}

impl Float64TimeDecoder {
    #[must_use]
    pub fn new(byte_order: ByteOrder) -> Self {
        Self { byte_order }
    }
}

impl TimeDecoder for Float64TimeDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Duration> {
        let Some(raw) = buf.get(..8) else {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: 8,
            });
        };
        let secs = f64::from_bits(self.byte_order.read_uint(raw));
        if !secs.is_finite() {
            return Err(Error::Timecode(format!("not a finite time: {secs}")));
        }
        Ok(Duration::from_seconds(secs))
    }
}

/// Encode `offset` as a CUC time code without P-field into `buf`, which must be exactly
/// `num_coarse + num_fine` bytes.
///
/// # Errors
/// [Error::Timecode] if `offset` is negative or does not fit the coarse field,
/// [Error::InvalidArgument] if the field sizes are not valid CUC sizes or don't match `buf`.
pub fn encode_cuc(offset: Duration, num_coarse: usize, num_fine: usize, buf: &mut [u8]) -> Result<()> {
    if !(1..=4).contains(&num_coarse) || num_fine > 3 {
        return Err(Error::InvalidArgument(format!(
            "invalid CUC layout {num_coarse}+{num_fine}"
        )));
    }
    if buf.len() != num_coarse + num_fine {
        return Err(Error::InvalidArgument(format!(
            "CUC buffer must be {} bytes, got {}",
            num_coarse + num_fine,
            buf.len()
        )));
    }
    let nanos = offset.total_nanoseconds();
    if nanos < 0 {
        return Err(Error::Timecode(format!("time before epoch: {offset}")));
    }
    let coarse = nanos / NANOS_PER_SEC;
    if coarse >> (8 * num_coarse) != 0 {
        return Err(Error::Timecode(format!(
            "{coarse}s does not fit {num_coarse} coarse octets"
        )));
    }
    let fine = ((nanos % NANOS_PER_SEC) << (8 * num_fine)) / NANOS_PER_SEC;

    let (coarse_buf, fine_buf) = buf.split_at_mut(num_coarse);
    coarse_buf.copy_from_slice(&coarse.to_be_bytes()[16 - num_coarse..]);
    fine_buf.copy_from_slice(&fine.to_be_bytes()[16 - num_fine..]);
    Ok(())
}

/// Serialize an [Epoch] as its display string.
pub(crate) fn serialize_epoch<S: Serializer>(
    t: &Epoch,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(t)
}

pub(crate) fn serialize_opt_epoch<S: Serializer>(
    t: &Option<Epoch>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match t {
        Some(t) => s.collect_str(t),
        None => s.serialize_none(),
    }
}

/// Source of the current time.
pub trait TimeService: Send + Sync + Debug {
    fn now(&self) -> Epoch;
}

/// [TimeService] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl TimeService for WallClock {
    fn now(&self) -> Epoch {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        TimeEpoch::Unix.to_epoch(Duration::from_total_nanoseconds(
            i128::try_from(since.as_nanos()).unwrap_or(i128::MAX),
        ))
    }
}

/// Time code kinds selectable in configuration.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeCodeKind {
    #[default]
    Cuc,
    Fixed,
    Float64,
}

/// Epochs selectable in configuration.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochKind {
    Tai,
    J2000,
    Unix,
    #[default]
    Gps,
    Custom,
}

fn default_true() -> bool {
    true
}

/// Configuration of a packet time code, e.g.
///
/// ```json
/// {"type": "CUC", "epoch": "CUSTOM", "epochUtc": "2010-01-01T00:00:00Z", "implicitPField": 29}
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEncodingConfig {
    #[serde(rename = "type", default)]
    pub kind: TimeCodeKind,
    #[serde(default)]
    pub epoch: EpochKind,
    /// Required for [EpochKind::Custom].
    pub epoch_utc: Option<String>,
    #[serde(default = "default_true")]
    pub time_includes_leap_seconds: bool,
    /// CUC P-field; when absent the P-field is read from the packet.
    #[serde(rename = "implicitPField", alias = "pfield")]
    pub implicit_pfield: Option<u8>,
    /// Size in bytes of a FIXED time code, 8 when absent.
    pub size: Option<usize>,
    /// Seconds per count of a FIXED time code.
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl Default for TimeEncodingConfig {
    fn default() -> Self {
        Self {
            kind: TimeCodeKind::Cuc,
            epoch: EpochKind::Gps,
            epoch_utc: None,
            time_includes_leap_seconds: true,
            implicit_pfield: Some(CUC_4_1_PFIELD),
            size: None,
            multiplier: None,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

impl TimeEncodingConfig {
    /// # Errors
    /// [Error::Config] for a custom epoch without a valid `epochUtc` or an invalid FIXED size.
    pub fn build(&self) -> Result<TimeEncoding> {
        let epoch = match self.epoch {
            EpochKind::Tai => TimeEpoch::Tai,
            EpochKind::J2000 => TimeEpoch::J2000,
            EpochKind::Unix => TimeEpoch::Unix,
            EpochKind::Gps => TimeEpoch::Gps,
            EpochKind::Custom => {
                let Some(utc) = &self.epoch_utc else {
                    return Err(Error::Config("CUSTOM epoch requires epochUtc".to_string()));
                };
                let epoch = Epoch::from_str(utc)
                    .map_err(|e| Error::Config(format!("invalid epochUtc {utc:?}: {e}")))?;
                TimeEpoch::Custom {
                    epoch,
                    includes_leap_seconds: self.time_includes_leap_seconds,
                }
            }
        };
        let decoder: Box<dyn TimeDecoder> = match self.kind {
            TimeCodeKind::Cuc => match self.implicit_pfield {
                Some(p) => {
                    CucTimeDecoder::layout(p).map_err(|e| Error::Config(e.to_string()))?;
                    Box::new(CucTimeDecoder::implicit(p))
                }
                None => Box::new(CucTimeDecoder::explicit()),
            },
            TimeCodeKind::Fixed => Box::new(FixedTimeDecoder::new(
                self.size.unwrap_or(8),
                self.multiplier.unwrap_or(1.0),
                self.byte_order,
            )?),
            TimeCodeKind::Float64 => Box::new(Float64TimeDecoder::new(self.byte_order)),
        };
        Ok(TimeEncoding { epoch, decoder })
    }
}

/// A decoder paired with the epoch its codes are relative to.
#[derive(Debug)]
pub struct TimeEncoding {
    pub epoch: TimeEpoch,
    pub decoder: Box<dyn TimeDecoder>,
}

impl Default for TimeEncoding {
    /// CUC with 4 coarse and 1 fine octets relative to the GPS epoch.
    fn default() -> Self {
        Self {
            epoch: TimeEpoch::Gps,
            decoder: Box::new(CucTimeDecoder::implicit(CUC_4_1_PFIELD)),
        }
    }
}

impl TimeEncoding {
    /// # Errors
    /// See [TimeDecoder::decode].
    pub fn decode(&self, buf: &[u8]) -> Result<Epoch> {
        Ok(self.epoch.to_epoch(self.decoder.decode(buf)?))
    }
}
