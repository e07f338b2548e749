use std::ops::{BitAnd, BitOr, Not};

use crate::mux::{MAX_PROGRAMS, MAX_STREAMS_PER_PROGRAM};

/// Kinds of index points.
///
/// The four lowest bits are reserved for the tables generated by the
/// multiplexor; the remaining bits are free for caller defined kinds carried
/// in a buffer's index identifier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexFlags(u32);
impl IndexFlags {
    pub const PAT: IndexFlags = IndexFlags(0x1);
    pub const PMT: IndexFlags = IndexFlags(0x2);
    pub const SDT: IndexFlags = IndexFlags(0x4);
    pub const DIT: IndexFlags = IndexFlags(0x8);

    /// All flags owned by the multiplexor.
    pub const TABLES: IndexFlags = IndexFlags(0xF);

    pub fn from_bits(bits: u32) -> Self {
        IndexFlags(bits)
    }

    /// Reads the flags of a buffer's index identifier (little endian).
    pub fn from_identifier(identifier: &[u8]) -> Self {
        let bits = identifier
            .iter()
            .take(4)
            .enumerate()
            .fold(0, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)));
        IndexFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: IndexFlags) -> bool {
        self.0 & other.0 == other.0
    }
}
impl BitOr for IndexFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        IndexFlags(self.0 | rhs.0)
    }
}
impl BitAnd for IndexFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        IndexFlags(self.0 & rhs.0)
    }
}
impl Not for IndexFlags {
    type Output = Self;
    fn not(self) -> Self {
        IndexFlags(!self.0)
    }
}

/// A point of interest in the output of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexRecord {
    /// Position of the packet, counted from the first packet of the session.
    pub packet_offset: u64,

    /// `None` for tables generated by the multiplexor.
    pub program_id: Option<usize>,
    pub stream_id: Option<usize>,

    /// Presentation time of the packet on the output clock (zero for tables).
    pub pts: u64,

    pub flags: IndexFlags,
}

/// Report of the latest prepare/perform pass.
///
/// Reset at the start of every `prepare_output`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputStatus {
    /// PCR at the start of the pass, in 90 kHz ticks.
    pub pcr: u64,

    /// Ticks elapsed since the first pass.
    pub offset_from_start: u64,

    /// Duration of the pass (the PCR period).
    pub output_duration: u64,

    /// Effective bitrate of the pass.
    pub bitrate: u64,

    pub output_packets: usize,

    /// Index points of the pass, when index generation is enabled.
    pub index: Vec<IndexRecord>,

    /// Size the output should have had, set with `ErrorKind::OutputOverflow`.
    pub overflow_output_size: Option<usize>,

    /// Stream that ran out of data, set with `ErrorKind::InputUnderflow`.
    pub input_underflow: Option<(usize, usize)>,

    /// User data of the buffers completed by the last `perform_output`.
    pub completed_buffers: Vec<u64>,

    /// Some queued data is still waiting to be sent.
    pub non_output_data_remains: bool,

    /// Decoder bit-buffer occupancy (in bits) after the pass, per stream.
    pub decoder_bit_buffer_levels: [[i64; MAX_STREAMS_PER_PROGRAM]; MAX_PROGRAMS],
}
