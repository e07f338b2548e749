use std::io::Write;

use crate::ts::adaptation_field::AdaptationFieldControl;
use crate::ts::{AdaptationField, ContinuityCounter, Pid, TransportScramblingControl, TsHeader,
                TsPacket, VersionNumber};
use crate::util;
use crate::{ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsiTableHeader {
    pub table_id: u8,
    pub private_bit: bool,
}
impl PsiTableHeader {
    fn flags(self, section_syntax_indicator: bool) -> u8 {
        ((section_syntax_indicator as u8) << 7) | ((self.private_bit as u8) << 6) | 0b0011_0000
    }
}

/// A pre-rendered single-packet PSI table.
///
/// Table packets keep their version number across regenerations and carry
/// their own continuity counter, advanced on every emission.
#[derive(Debug, Clone)]
pub struct TablePacket {
    pid: Pid,
    bytes: [u8; TsPacket::SIZE],
    version_number: VersionNumber,
    continuity_counter: ContinuityCounter,
    data_offset: usize,
}
impl TablePacket {
    /// Makes an empty table packet for `pid`.
    pub fn new(pid: Pid) -> Self {
        TablePacket {
            pid,
            bytes: [0xFF; TsPacket::SIZE],
            version_number: VersionNumber::new(),
            continuity_counter: ContinuityCounter::new(),
            data_offset: 0,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn version_number(&self) -> VersionNumber {
        self.version_number
    }

    /// Raw packet bytes with the continuity counter of the latest emission.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    /// Renders a section with the long syntax (`section_syntax_indicator` set).
    ///
    /// The version number advances on every call and the section ends with
    /// its CRC-32.
    pub fn write_long_section(
        &mut self,
        header: PsiTableHeader,
        table_id_extension: u16,
        discontinuity: bool,
        table_data: &[u8],
    ) -> Result<()> {
        let section_len = 5 + table_data.len() + 4;
        let start = track!(self.begin(discontinuity, 3 + section_len))?;
        let version_number = self.version_number.increment();

        let mut i = start;
        self.bytes[i] = header.table_id;
        self.bytes[i + 1] = header.flags(true) | ((section_len >> 8) as u8 & 0x0F);
        self.bytes[i + 2] = section_len as u8;
        self.bytes[i + 3..i + 5].copy_from_slice(&table_id_extension.to_be_bytes());
        self.bytes[i + 5] = 0xC1 | (version_number.as_u8() << 1);
        self.bytes[i + 6] = 0; // section_number
        self.bytes[i + 7] = 0; // last_section_number
        i += 8;
        self.data_offset = i;
        self.bytes[i..i + table_data.len()].copy_from_slice(table_data);
        i += table_data.len();

        let end = start + util::append_crc(&mut self.bytes[start..], i - start);
        for b in &mut self.bytes[end..] {
            *b = 0xFF;
        }
        Ok(())
    }

    /// Renders a section with the short syntax (no version, no CRC).
    pub fn write_short_section(
        &mut self,
        header: PsiTableHeader,
        discontinuity: bool,
        table_data: &[u8],
    ) -> Result<()> {
        let section_len = table_data.len();
        let start = track!(self.begin(discontinuity, 3 + section_len))?;

        self.bytes[start] = header.table_id;
        self.bytes[start + 1] = header.flags(false) | ((section_len >> 8) as u8 & 0x0F);
        self.bytes[start + 2] = section_len as u8;
        self.data_offset = start + 3;
        let end = self.data_offset + section_len;
        self.bytes[self.data_offset..end].copy_from_slice(table_data);
        for b in &mut self.bytes[end..] {
            *b = 0xFF;
        }
        Ok(())
    }

    /// Overwrites one byte of the rendered table data in place.
    pub fn patch_table_data(&mut self, offset: usize, value: u8) {
        self.bytes[self.data_offset + offset] = value;
    }

    /// Advances the continuity counter and writes the packet.
    pub fn emit<W: Write>(&mut self, mut writer: W) -> Result<()> {
        let cc = self.continuity_counter.increment();
        self.bytes[3] = (self.bytes[3] & 0xF0) | cc.as_u8();
        track_io!(writer.write_all(&self.bytes[..]))?;
        Ok(())
    }

    // Writes the header, the optional discontinuity adaptation field and the
    // pointer field. Returns the offset of the section.
    fn begin(&mut self, discontinuity: bool, section_size: usize) -> Result<usize> {
        let adaptation_size = if discontinuity { 2 } else { 0 };
        let start = TsPacket::HEADER_SIZE + adaptation_size + 1;
        track_assert!(
            start + section_size <= TsPacket::SIZE,
            ErrorKind::InvalidParameter,
            "Table does not fit in one packet: pid={}, section_size={}",
            self.pid.as_u16(),
            section_size
        );

        let header = TsHeader::new(
            true,
            self.pid,
            TransportScramblingControl::NotScrambled,
            track!(AdaptationFieldControl::new(discontinuity, true))?,
            self.continuity_counter,
        );
        let mut writer = &mut self.bytes[..];
        track!(header.write_to(&mut writer))?;
        if discontinuity {
            let field = AdaptationField {
                discontinuity_indicator: true,
                ..AdaptationField::default()
            };
            track!(field.write_to(&mut writer, adaptation_size))?;
        }
        self.bytes[start - 1] = 0; // pointer_field
        Ok(start)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HEADER: PsiTableHeader = PsiTableHeader {
        table_id: 0x42,
        private_bit: true,
    };

    #[test]
    fn long_section_layout() {
        let mut packet = TablePacket::new(Pid::SDT);
        track_try_unwrap!(packet.write_long_section(HEADER, 7, false, &[1, 2, 3]));

        let bytes = packet.bytes();
        assert_eq!(&bytes[..5], &[0x47, 0x40, 0x11, 0x10, 0x00]);
        assert_eq!(bytes[5], 0x42);
        assert_eq!(bytes[6], 0xF0);
        let section_len = usize::from(bytes[7]);
        assert_eq!(section_len, 5 + 3 + 4);
        assert_eq!(&bytes[8..10], &[0, 7]);
        assert_eq!(bytes[10], 0xC3);
        assert_eq!(&bytes[13..16], &[1, 2, 3]);
        assert_eq!(util::crc32(&bytes[5..8 + section_len]), 0);
        assert!(bytes[8 + section_len..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn version_advances_per_regeneration() {
        let mut packet = TablePacket::new(Pid::PAT);
        for expected in &[0xC3u8, 0xC5, 0xC7] {
            track_try_unwrap!(packet.write_long_section(HEADER, 1, false, &[]));
            assert_eq!(packet.bytes()[10], *expected);
        }
        for _ in 0..29 {
            track_try_unwrap!(packet.write_long_section(HEADER, 1, false, &[]));
        }
        assert_eq!(packet.version_number().as_u8(), 0);
        assert_eq!(packet.bytes()[10], 0xC1);
    }

    #[test]
    fn discontinuity_adaptation_field() {
        let mut packet = TablePacket::new(Pid::PAT);
        track_try_unwrap!(packet.write_long_section(HEADER, 1, true, &[]));
        assert_eq!(&packet.bytes()[..8], &[0x47, 0x40, 0x00, 0x30, 0x01, 0x80, 0x00, 0x42]);
    }

    #[test]
    fn emission_advances_continuity_counter() {
        let mut packet = TablePacket::new(Pid::DIT);
        let header = PsiTableHeader {
            table_id: 0x7E,
            private_bit: true,
        };
        track_try_unwrap!(packet.write_short_section(header, false, &[0x7F]));

        let mut out = Vec::new();
        track_try_unwrap!(packet.emit(&mut out));
        track_try_unwrap!(packet.emit(&mut out));
        assert_eq!(out.len(), 2 * TsPacket::SIZE);
        assert_eq!(out[3], 0x11);
        assert_eq!(out[TsPacket::SIZE + 3], 0x12);
        assert_eq!(&out[4..9], &[0x00, 0x7E, 0x70, 0x01, 0x7F]);
    }

    #[test]
    fn oversized_table_is_rejected() {
        let mut packet = TablePacket::new(Pid::PAT);
        assert!(packet
            .write_long_section(HEADER, 1, false, &[0; 200])
            .is_err());
    }
}
