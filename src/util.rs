use crc::{Crc, CRC_32_MPEG_2};
use std::io::Write;

use crate::Result;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Computes the CRC-32/MPEG-2 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Appends the big-endian CRC-32/MPEG-2 of `buf[..len]` at `buf[len..len + 4]`.
///
/// Returns the new length.
pub fn append_crc(buf: &mut [u8], len: usize) -> usize {
    let crc = crc32(&buf[..len]);
    buf[len..len + 4].copy_from_slice(&crc.to_be_bytes());
    len + 4
}

pub fn write_stuffing_bytes<W: Write>(mut writer: W, len: usize) -> Result<()> {
    let stuffing_bytes = [0xFF; 188];
    track_io!(writer.write_all(&stuffing_bytes[..len]))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crc_residue_is_zero() {
        let contents: &[&[u8]] = &[
            b"",
            b"\x00",
            b"123456789",
            &[0x00, 0xb0, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xe1, 0x00],
        ];
        for content in contents {
            let mut buf = content.to_vec();
            buf.extend_from_slice(&[0; 4]);
            let len = append_crc(&mut buf, content.len());
            assert_eq!(len, content.len() + 4);
            assert_eq!(crc32(&buf[..len]), 0);
        }
    }

    #[test]
    fn crc_check_value() {
        assert_eq!(crc32(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn stuffing() {
        let mut buf = Vec::new();
        track_try_unwrap!(write_stuffing_bytes(&mut buf, 7));
        assert_eq!(buf, vec![0xFF; 7]);
    }
}
