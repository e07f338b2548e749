use byteorder::WriteBytesExt;
use std::io::Write;

use crate::time::ClockReference;
use crate::ts::adaptation_field::AdaptationFieldControl;
use crate::ts::{ContinuityCounter, Pid, TransportScramblingControl, TsHeader, TsPacket};
use crate::util;
use crate::Result;

/// Null packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Null;
impl Null {
    /// Writes a null packet: header on the null PID followed by `0xFF` payload.
    pub fn write_to<W: Write>(mut writer: W) -> Result<()> {
        let header = TsHeader::new(
            false,
            Pid::NULL,
            TransportScramblingControl::NotScrambled,
            AdaptationFieldControl::PayloadOnly,
            ContinuityCounter::new(),
        );
        track!(header.write_to(&mut writer))?;
        track!(util::write_stuffing_bytes(writer, TsPacket::MAX_PAYLOAD_SIZE))?;
        Ok(())
    }
}

/// Dedicated PCR packet: an adaptation field only packet carrying a PCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcrPacket {
    pub pid: Pid,
    pub continuity_counter: ContinuityCounter,
    pub discontinuity_indicator: bool,
    pub pcr: ClockReference,
}
impl PcrPacket {
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let header = TsHeader::new(
            false,
            self.pid,
            TransportScramblingControl::NotScrambled,
            AdaptationFieldControl::AdaptationFieldOnly,
            self.continuity_counter,
        );
        track!(header.write_to(&mut writer))?;

        // adaptation_field_length and flags
        track_io!(writer.write_u8((TsPacket::MAX_PAYLOAD_SIZE - 1) as u8))?;
        track_io!(writer.write_u8(((self.discontinuity_indicator as u8) << 7) | 0x10))?;
        track!(self.pcr.write_pcr_to(&mut writer))?;
        track!(util::write_stuffing_bytes(
            writer,
            TsPacket::MAX_PAYLOAD_SIZE - 2 - ClockReference::PCR_SIZE
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_packet() {
        let mut buf = Vec::new();
        track_try_unwrap!(Null::write_to(&mut buf));
        assert_eq!(buf.len(), TsPacket::SIZE);
        assert_eq!(&buf[..4], &[0x47, 0x1F, 0xFF, 0x10]);
        assert!(buf[4..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn pcr_packet() {
        let packet = PcrPacket {
            pid: track_try_unwrap!(Pid::new(0x1FFE)),
            continuity_counter: ContinuityCounter::new(),
            discontinuity_indicator: true,
            pcr: ClockReference::new(300),
        };
        let mut buf = Vec::new();
        track_try_unwrap!(packet.write_to(&mut buf));
        assert_eq!(buf.len(), TsPacket::SIZE);
        assert_eq!(&buf[..6], &[0x47, 0x1F, 0xFE, 0x20, 0xB7, 0x90]);
        assert_eq!(&buf[6..12], &[0x00, 0x00, 0x00, 0x00, 0xFE, 0x00]);
        assert!(buf[12..].iter().all(|&b| b == 0xFF));
    }
}
