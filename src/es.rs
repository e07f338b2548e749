//! Elementary stream identifiers.
pub use self::stream_id::StreamId;

use crate::{ErrorKind, Result};

mod stream_id;

/// Stream type, as announced for each elementary stream in the PMT.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamType {
    Mpeg1Video = 0x01,
    Mpeg2Video = 0x02,
    Mpeg1Audio = 0x03,
    Mpeg2Audio = 0x04,
    PrivateSections = 0x05,
    PrivateData = 0x06,
    Mheg = 0x07,
    DsmCc = 0x08,
    H2221 = 0x09,
    AdtsAac = 0x0F,
    Mpeg4Video = 0x10,
    H264 = 0x1B,
    Ac3 = 0x81,
    Dts = 0x8A,
    Lpcm = 0x8B,
    DiracVideo = 0xD1,
    DvdSubpicture = 0xFF,
}
impl StreamType {
    /// Converts the given number to the corresponding `StreamType`.
    ///
    /// # Errors
    ///
    /// Unknown values yield an `ErrorKind::UnsupportedStreamType` error.
    pub fn from_u8(n: u8) -> Result<Self> {
        Ok(match n {
            0x01 => StreamType::Mpeg1Video,
            0x02 => StreamType::Mpeg2Video,
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x05 => StreamType::PrivateSections,
            0x06 => StreamType::PrivateData,
            0x07 => StreamType::Mheg,
            0x08 => StreamType::DsmCc,
            0x09 => StreamType::H2221,
            0x0F => StreamType::AdtsAac,
            0x10 => StreamType::Mpeg4Video,
            0x1B => StreamType::H264,
            0x81 => StreamType::Ac3,
            0x8A => StreamType::Dts,
            0x8B => StreamType::Lpcm,
            0xD1 => StreamType::DiracVideo,
            0xFF => StreamType::DvdSubpicture,
            _ => track_panic!(
                ErrorKind::UnsupportedStreamType,
                "Unknown stream type: {}",
                n
            ),
        })
    }

    /// Returns `true` if streams of this type are normally carried as PES packets.
    pub fn is_pes(self) -> bool {
        self != StreamType::PrivateSections
    }
}
