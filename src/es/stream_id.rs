/// PES stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u8);
impl StreamId {
    pub const PROGRAM_STREAM_MAP: u8 = 0xBC;
    pub const PADDING_STREAM: u8 = 0xBE;
    pub const PRIVATE_STREAM_2: u8 = 0xBF;
    pub const ECM_STREAM: u8 = 0xF0;
    pub const EMM_STREAM: u8 = 0xF1;
    pub const DSMCC_STREAM: u8 = 0xF2;
    pub const H222_1_TYPE_E_STREAM: u8 = 0xF8;
    pub const PROGRAM_STREAM_DIRECTORY: u8 = 0xFF;

    /// Makes a new `StreamId` instance.
    pub fn new(id: u8) -> Self {
        StreamId(id)
    }

    /// Returns the value of the identifier.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns `true` if it is an audio identifier, otherwise `false`.
    pub fn is_audio(self) -> bool {
        0xC0 <= self.0 && self.0 <= 0xDF
    }

    /// Returns `true` if it is a video identifier, otherwise `false`.
    pub fn is_video(self) -> bool {
        0xE0 <= self.0 && self.0 <= 0xEF
    }

    /// Returns `true` if packets of this stream carry the optional PES header
    /// (and therefore may carry PTS/DTS).
    pub fn has_pes_header(self) -> bool {
        match self.0 {
            Self::PROGRAM_STREAM_MAP
            | Self::PADDING_STREAM
            | Self::PRIVATE_STREAM_2
            | Self::ECM_STREAM
            | Self::EMM_STREAM
            | Self::DSMCC_STREAM
            | Self::H222_1_TYPE_E_STREAM
            | Self::PROGRAM_STREAM_DIRECTORY => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pes_header_presence() {
        assert!(StreamId::new(0xE0).has_pes_header());
        assert!(StreamId::new(0xC0).has_pes_header());
        assert!(StreamId::new(0xBD).has_pes_header());
        assert!(!StreamId::new(0xBE).has_pes_header());
        assert!(!StreamId::new(0xF2).has_pes_header());
    }
}
