use byteorder::WriteBytesExt;
use std::io::Write;

use crate::time::ClockReference;
use crate::util;
use crate::{ErrorKind, Result};

/// Adaptation field, restricted to the parts the multiplexor emits.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct AdaptationField {
    /// Set `true` if current TS packet is in a discontinuity state with respect to
    /// either the continuity counter or the program clock reference.
    pub discontinuity_indicator: bool,

    /// Set `true` when the stream may be decoded without errors from this point.
    pub random_access_indicator: bool,

    pub pcr: Option<ClockReference>,
}
impl AdaptationField {
    /// Size of the field including its length byte, before any stuffing.
    pub fn external_size(&self) -> usize {
        let mut n = 1 /* adaptation_field_len */ + 1 /* flags */;
        if self.pcr.is_some() {
            n += ClockReference::PCR_SIZE;
        }
        n
    }

    /// Writes an adaptation field consisting of stuffing only.
    ///
    /// `size` counts the length byte; a size of one writes a lone zero length.
    pub fn write_stuffing<W: Write>(mut writer: W, size: usize) -> Result<()> {
        track_assert_ne!(size, 0, ErrorKind::InvalidParameter);
        track_io!(writer.write_u8((size - 1) as u8))?;
        if size == 1 {
            return Ok(());
        }
        track_io!(writer.write_u8(0))?;
        track!(util::write_stuffing_bytes(&mut writer, size - 2))?;
        Ok(())
    }

    /// Writes the field padded with stuffing bytes to exactly `size` bytes
    /// (length byte included).
    pub fn write_to<W: Write>(&self, mut writer: W, size: usize) -> Result<()> {
        track_assert!(
            self.external_size() <= size && size <= 184,
            ErrorKind::InvalidParameter,
            "No space for adaptation field: required={}, size={}",
            self.external_size(),
            size
        );
        track_io!(writer.write_u8((size - 1) as u8))?;

        let n = ((self.discontinuity_indicator as u8) << 7)
            | ((self.random_access_indicator as u8) << 6)
            | ((self.pcr.is_some() as u8) << 4);
        track_io!(writer.write_u8(n))?;

        if let Some(ref x) = self.pcr {
            track!(x.write_pcr_to(&mut writer))?;
        }

        let stuffing_len = size - self.external_size();
        track!(util::write_stuffing_bytes(writer, stuffing_len))?;
        Ok(())
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdaptationFieldControl {
    PayloadOnly = 0b01,
    AdaptationFieldOnly = 0b10,
    AdaptationFieldAndPayload = 0b11,
}
impl AdaptationFieldControl {
    pub fn new(has_adaptation_field: bool, has_payload: bool) -> Result<Self> {
        Ok(match (has_adaptation_field, has_payload) {
            (true, true) => AdaptationFieldControl::AdaptationFieldAndPayload,
            (true, false) => AdaptationFieldControl::AdaptationFieldOnly,
            (false, true) => AdaptationFieldControl::PayloadOnly,
            (false, false) => track_panic!(ErrorKind::InvalidParameter, "Reserved for future use"),
        })
    }
}
