use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::ts::adaptation_field::AdaptationFieldControl;
use crate::ts::{ContinuityCounter, Pid, TransportScramblingControl};
use crate::Result;

/// Transport stream packet constants.
#[derive(Debug)]
pub struct TsPacket;
impl TsPacket {
    /// Size of a packet in bytes.
    pub const SIZE: usize = 188;

    /// Size of a packet preceded by its 4-byte 27 MHz timestamp.
    pub const TIMESTAMPED_SIZE: usize = 192;

    /// Size of the fixed packet header.
    pub const HEADER_SIZE: usize = 4;

    /// Maximum payload carried by one packet.
    pub const MAX_PAYLOAD_SIZE: usize = Self::SIZE - Self::HEADER_SIZE;

    /// Synchronization byte.
    ///
    /// Each packet starts with this byte.
    pub const SYNC_BYTE: u8 = 0x47;
}

/// TS packet header.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TsHeader {
    pub transport_error_indicator: bool,
    pub payload_unit_start_indicator: bool,
    pub transport_priority: bool,
    pub pid: Pid,
    pub transport_scrambling_control: TransportScramblingControl,
    pub adaptation_field_control: AdaptationFieldControl,
    pub continuity_counter: ContinuityCounter,
}
impl TsHeader {
    /// Makes the header of a packet produced by the multiplexor.
    ///
    /// Error indicator and priority are always clear.
    pub fn new(
        payload_unit_start_indicator: bool,
        pid: Pid,
        transport_scrambling_control: TransportScramblingControl,
        adaptation_field_control: AdaptationFieldControl,
        continuity_counter: ContinuityCounter,
    ) -> Self {
        TsHeader {
            transport_error_indicator: false,
            payload_unit_start_indicator,
            transport_priority: false,
            pid,
            transport_scrambling_control,
            adaptation_field_control,
            continuity_counter,
        }
    }

    /// Writes the 4-byte header.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        track_io!(writer.write_u8(TsPacket::SYNC_BYTE))?;

        let n = ((self.transport_error_indicator as u16) << 15)
            | ((self.payload_unit_start_indicator as u16) << 14)
            | ((self.transport_priority as u16) << 13)
            | self.pid.as_u16();
        track_io!(writer.write_u16::<BigEndian>(n))?;

        let n = ((self.transport_scrambling_control as u8) << 6)
            | ((self.adaptation_field_control as u8) << 4)
            | self.continuity_counter.as_u8();
        track_io!(writer.write_u8(n))?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_layout() {
        let header = TsHeader::new(
            true,
            track_try_unwrap!(Pid::new(0x101)),
            TransportScramblingControl::ScrambledWithOddKey,
            AdaptationFieldControl::AdaptationFieldAndPayload,
            track_try_unwrap!(ContinuityCounter::from_u8(9)),
        );
        let mut buf = Vec::new();
        track_try_unwrap!(header.write_to(&mut buf));
        assert_eq!(buf, [0x47, 0x41, 0x01, 0xF9]);
    }

    #[test]
    fn payload_only_header() {
        let header = TsHeader::new(
            false,
            track_try_unwrap!(Pid::new(0x1FFF)),
            TransportScramblingControl::NotScrambled,
            AdaptationFieldControl::PayloadOnly,
            ContinuityCounter::new(),
        );
        let mut buf = Vec::new();
        track_try_unwrap!(header.write_to(&mut buf));
        assert_eq!(buf, [0x47, 0x1F, 0xFF, 0x10]);
    }
}
