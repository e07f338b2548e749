//! Time arithmetic on the MPEG-2 system clock.
//!
//! PTS, DTS and PCR base values are 33-bit counters of a 90 kHz clock which
//! silently wrap around. All helpers in this module treat them as points on a
//! circle of `2^33` ticks.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{ErrorKind, Result};

/// Largest representable 33-bit timestamp.
pub const MAX_TIMESTAMP: u64 = (1 << 33) - 1;

/// Ticks per second of the 90 kHz clock.
pub const TIMESTAMP_RESOLUTION: u64 = 90_000;

/// Wraps `t` into the 33-bit timestamp space.
///
/// Intermediate values may be computed with `wrapping_add`/`wrapping_sub` on
/// `u64`; since `2^64` is a multiple of `2^33` the masked result is exact.
pub fn pcr_limit(t: u64) -> u64 {
    t & MAX_TIMESTAMP
}

/// Returns `true` if `t` lies in the circular interval `[start, end)`.
///
/// When `end < start` the interval wraps through zero.
/// An interval with `start == end` is empty.
pub fn in_time_period(t: u64, start: u64, end: u64) -> bool {
    if start <= end {
        start <= t && t < end
    } else {
        t >= start || t < end
    }
}

/// Returns `true` if `t` precedes `reference` on the timestamp circle.
///
/// The ordering is decided by whichever direction around the circle is
/// shorter, so `0x1_ffff_fff0` is before `0x10`.
pub fn time_is_before(t: u64, reference: u64) -> bool {
    let forward = pcr_limit(reference.wrapping_sub(t));
    let backward = pcr_limit(t.wrapping_sub(reference));
    forward != 0 && forward < backward
}

/// Timestamp for PTS/DTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(u64);
impl Timestamp {
    /// 90 kHz.
    pub const RESOLUTION: u64 = TIMESTAMP_RESOLUTION;

    /// Maximum timestamp value.
    pub const MAX: u64 = MAX_TIMESTAMP;

    /// Makes a new `Timestamp` instance.
    ///
    /// # Errors
    ///
    /// If `n` exceeds `Timestamp::MAX`, it will return an `ErrorKind::InvalidParameter` error.
    pub fn new(n: u64) -> Result<Self> {
        track_assert!(
            n <= Self::MAX,
            ErrorKind::InvalidParameter,
            "Too large value: {}",
            n
        );
        Ok(Timestamp(n))
    }

    /// Returns the value of the timestamp.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reads the 5-byte PES encoding of a timestamp.
    ///
    /// `check_bits` is the 4-bit prefix (`0b0010` for a lone PTS, `0b0011` for a
    /// PTS followed by a DTS and `0b0001` for that DTS).
    pub fn read_from<R: Read>(mut reader: R, check_bits: u8) -> Result<Self> {
        let n0 = track_io!(reader.read_u8())?;
        let n1 = track_io!(reader.read_u16::<BigEndian>())?;
        let n2 = track_io!(reader.read_u16::<BigEndian>())?;

        track_assert_eq!(
            n0 >> 4,
            check_bits,
            ErrorKind::InvalidParameter,
            "Unexpected check bits: actual={}, expected={}",
            n0 >> 4,
            check_bits
        );
        track_assert_eq!(n0 & 1, 1, ErrorKind::InvalidParameter, "Unexpected marker bit");
        track_assert_eq!(n1 & 1, 1, ErrorKind::InvalidParameter, "Unexpected marker bit");
        track_assert_eq!(n2 & 1, 1, ErrorKind::InvalidParameter, "Unexpected marker bit");

        let t = (u64::from(n0 & 0b0000_1110) << 29)
            | (u64::from(n1 >> 1) << 15)
            | u64::from(n2 >> 1);
        Ok(Timestamp(t))
    }

    /// Writes the 5-byte PES encoding of the timestamp.
    pub fn write_to<W: Write>(self, mut writer: W, check_bits: u8) -> Result<()> {
        let n0 = (check_bits << 4) | ((self.0 >> 29) as u8 & 0b0000_1110) | 1;
        let n1 = (((self.0 >> 14) as u16) & 0xFFFE) | 1;
        let n2 = (((self.0 << 1) as u16) & 0xFFFE) | 1;
        track_io!(writer.write_u8(n0))?;
        track_io!(writer.write_u16::<BigEndian>(n1))?;
        track_io!(writer.write_u16::<BigEndian>(n2))?;
        Ok(())
    }
}

/// A 27 MHz system clock value, as carried in PCR fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockReference(u64);
impl ClockReference {
    /// 27 MHz.
    pub const RESOLUTION: u64 = 27_000_000;

    /// Size of an encoded `program_clock_reference` field.
    pub const PCR_SIZE: usize = 6;

    /// Makes a new `ClockReference` instance from a raw 27 MHz count.
    pub fn new(n: u64) -> Self {
        ClockReference(n)
    }

    /// Makes the clock value of a 90 kHz timestamp.
    pub fn from_timestamp(t: u64) -> Self {
        ClockReference(t * 300)
    }

    /// Returns the raw 27 MHz count.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the 33-bit 90 kHz base part.
    pub fn base(self) -> u64 {
        pcr_limit(self.0 / 300)
    }

    /// Returns the 9-bit 27 MHz extension part.
    pub fn extension(self) -> u16 {
        (self.0 % 300) as u16
    }

    /// Encodes the clock as a `program_clock_reference` field.
    ///
    /// The six reserved bits between base and extension are set.
    pub fn to_pcr_bytes(self) -> [u8; 6] {
        let base = self.0 / 300;
        let extension = self.0 - base * 300;
        [
            (base >> 25) as u8,
            (base >> 17) as u8,
            (base >> 9) as u8,
            (base >> 1) as u8,
            ((base << 7) as u8 & 0x80) | 0x7e | ((extension >> 8) as u8 & 0x01),
            extension as u8,
        ]
    }

    /// Writes the clock as a `program_clock_reference` field.
    pub fn write_pcr_to<W: Write>(self, mut writer: W) -> Result<()> {
        track_io!(writer.write_all(&self.to_pcr_bytes()))?;
        Ok(())
    }

    /// Reads a `program_clock_reference` field.
    pub fn read_pcr_from<R: Read>(mut reader: R) -> Result<Self> {
        let n = track_io!(reader.read_uint::<BigEndian>(6))?;
        let base = n >> 15;
        let extension = n & 0b1_1111_1111;
        Ok(ClockReference(base * 300 + extension))
    }
}
impl From<Timestamp> for ClockReference {
    fn from(f: Timestamp) -> Self {
        ClockReference::from_timestamp(f.as_u64())
    }
}
