//! Packetized elementary stream headers.
//!
//! The multiplexor does not packetize elementary streams itself; callers hand
//! it complete PES packets. It only needs to rewrite the PTS/DTS of a header
//! in place when the whole output is shifted in time.
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::es::StreamId;
use crate::time::{pcr_limit, Timestamp};
use crate::{ErrorKind, Result};

const PACKET_START_CODE_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

/// Minimum number of bytes of a PES header carrying a PTS.
pub const MIN_TIMESTAMPED_HEADER_SIZE: usize = 14;

/// PES packet header, restricted to PTS and DTS.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PesHeader {
    pub stream_id: StreamId,

    /// `true` indicates that the PES packet header is immediately followed by
    /// the video start code or audio syncword.
    pub data_alignment_indicator: bool,

    pub pts: Option<Timestamp>,
    pub dts: Option<Timestamp>,
}
impl PesHeader {
    /// Size of the header once written.
    pub fn size(&self) -> usize {
        9 + self.pts.map_or(0, |_| 5) + self.dts.map_or(0, |_| 5)
    }

    /// Writes the header of a packet carrying `payload_len` bytes.
    ///
    /// A packet too long for the 16-bit length field is written with an
    /// unbounded (zero) length, as allowed for video streams.
    pub fn write_to<W: Write>(&self, mut writer: W, payload_len: usize) -> Result<()> {
        if self.dts.is_some() {
            track_assert!(self.pts.is_some(), ErrorKind::InvalidParameter);
        }
        track_io!(writer.write_all(&PACKET_START_CODE_PREFIX))?;
        track_io!(writer.write_u8(self.stream_id.as_u8()))?;

        let packet_len = self.size() - 6 + payload_len;
        let packet_len = if packet_len > 0xFFFF { 0 } else { packet_len as u16 };
        track_io!(writer.write_u16::<BigEndian>(packet_len))?;

        let n = 0b1000_0000 | ((self.data_alignment_indicator as u8) << 2);
        track_io!(writer.write_u8(n))?;

        let n = ((self.pts.is_some() as u8) << 7) | ((self.dts.is_some() as u8) << 6);
        track_io!(writer.write_u8(n))?;

        let pes_header_len = (self.size() - 9) as u8;
        track_io!(writer.write_u8(pes_header_len))?;
        if let Some(x) = self.pts {
            let check_bits = if self.dts.is_some() { 3 } else { 2 };
            track!(x.write_to(&mut writer, check_bits))?;
        }
        if let Some(x) = self.dts {
            track!(x.write_to(&mut writer, 1))?;
        }
        Ok(())
    }
}

/// Adds `shift` (modulo 2^33) to the PTS, and DTS if present, of the PES
/// header at the start of `data`.
///
/// Returns the shifted PTS. Nothing is modified when the header is not a
/// valid timestamped PES header.
pub fn shift_timestamps(data: &mut [u8], shift: u64) -> Result<Timestamp> {
    track_assert!(
        data.len() >= MIN_TIMESTAMPED_HEADER_SIZE,
        ErrorKind::InvalidParameter,
        "Too short for a PES header: {} bytes",
        data.len()
    );
    track_assert_eq!(
        &data[..3],
        &PACKET_START_CODE_PREFIX[..],
        ErrorKind::InvalidParameter,
        "Invalid start code"
    );
    track_assert!(
        StreamId::new(data[3]).has_pes_header(),
        ErrorKind::InvalidParameter,
        "No PES header for stream id {:#x}",
        data[3]
    );
    let packet_len = u16::from_be_bytes([data[4], data[5]]);
    track_assert!(
        packet_len == 0 || packet_len >= 8,
        ErrorKind::InvalidParameter,
        "Invalid PES packet length: {}",
        packet_len
    );

    let pts_flag = (data[7] & 0b1000_0000) != 0;
    let dts_flag = (data[7] & 0b0100_0000) != 0;
    track_assert!(pts_flag, ErrorKind::InvalidParameter, "No PTS");
    let header_len = usize::from(data[8]);
    let min_header_len = if dts_flag { 10 } else { 5 };
    track_assert!(
        header_len >= min_header_len,
        ErrorKind::InvalidParameter,
        "Invalid PES header length: {}",
        header_len
    );
    track_assert!(
        !dts_flag || data.len() >= MIN_TIMESTAMPED_HEADER_SIZE + 5,
        ErrorKind::InvalidParameter,
        "Too short for a PES header with DTS: {} bytes",
        data.len()
    );

    let pts_check_bits = if dts_flag { 0b0011 } else { 0b0010 };
    let pts = track!(Timestamp::read_from(&data[9..14], pts_check_bits))?;
    let dts = if dts_flag {
        Some(track!(Timestamp::read_from(&data[14..19], 0b0001))?)
    } else {
        None
    };

    let pts = track!(Timestamp::new(pcr_limit(pts.as_u64() + shift)))?;
    track!(pts.write_to(&mut data[9..14], pts_check_bits))?;
    if let Some(dts) = dts {
        let dts = track!(Timestamp::new(pcr_limit(dts.as_u64() + shift)))?;
        track!(dts.write_to(&mut data[14..19], 0b0001))?;
    }
    Ok(pts)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::MAX_TIMESTAMP;

    fn header_bytes(pts: u64, dts: Option<u64>) -> Vec<u8> {
        let header = PesHeader {
            stream_id: StreamId::new(0xE0),
            data_alignment_indicator: true,
            pts: Some(track_try_unwrap!(Timestamp::new(pts))),
            dts: dts.map(|t| track_try_unwrap!(Timestamp::new(t))),
        };
        let mut buf = Vec::new();
        track_try_unwrap!(header.write_to(&mut buf, 4));
        buf.extend_from_slice(&[0xAA; 4]);
        buf
    }

    #[test]
    fn header_layout() {
        let buf = header_bytes(90_000, None);
        assert_eq!(buf.len(), 14 + 4);
        assert_eq!(&buf[..9], &[0x00, 0x00, 0x01, 0xE0, 0x00, 0x0C, 0x84, 0x80, 0x05]);
        assert_eq!(buf[9] >> 4, 0b0010);
    }

    #[test]
    fn shift_pts_only() {
        let mut buf = header_bytes(MAX_TIMESTAMP - 9, None);
        let pts = track_try_unwrap!(shift_timestamps(&mut buf, 20));
        assert_eq!(pts.as_u64(), 10);
        assert_eq!(buf, header_bytes(10, None));
    }

    #[test]
    fn shift_pts_and_dts() {
        let mut buf = header_bytes(3000, Some(0));
        track_try_unwrap!(shift_timestamps(&mut buf, 90_000));
        assert_eq!(buf, header_bytes(93_000, Some(90_000)));
    }

    #[test]
    fn invalid_headers_are_left_alone() {
        let mut short = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00];
        assert!(shift_timestamps(&mut short, 1).is_err());

        let mut padding = header_bytes(0, None);
        padding[3] = 0xBE;
        let copy = padding.clone();
        assert!(shift_timestamps(&mut padding, 1).is_err());
        assert_eq!(padding, copy);

        let mut no_pts = header_bytes(0, None);
        no_pts[7] = 0;
        assert!(shift_timestamps(&mut no_pts, 1).is_err());
    }
}
