use std::fmt;
use std::sync::Mutex;

use crate::mux::{lock, MAX_BUFFERS, MAX_INDEX_IDENTIFIER_SIZE, MAX_SCATTER_PAGES};
use trackable::{History, Location, Trackable};

use crate::ring::Ring;
use crate::{Error, ErrorKind, Result};

/// Identifier of a buffer structure (`0..MAX_BUFFERS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(usize);
impl BufferId {
    /// Makes a new `BufferId` instance.
    ///
    /// # Errors
    ///
    /// If `id` is not below `MAX_BUFFERS`, it will return an `ErrorKind::InvalidId` error.
    pub fn new(id: usize) -> Result<Self> {
        track_assert!(id < MAX_BUFFERS, ErrorKind::InvalidId, "Invalid buffer id: {}", id);
        Ok(BufferId(id))
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Identifier of a scatter page structure (`0..MAX_SCATTER_PAGES`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(usize);
impl PageId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// One contiguous span of a buffer's data.
#[derive(Debug, PartialEq, Eq)]
pub struct ScatterPage {
    id: PageId,
    pub data: Vec<u8>,
}
impl ScatterPage {
    pub fn id(&self) -> PageId {
        self.id
    }
}

/// A unit of stream data supplied to the multiplexor.
///
/// Obtained from [`BufferPool::get_buffer_structure`], filled in by the
/// caller, handed over with `Multiplexor::supply_buffer` and returned
/// through the [`BufferRelease`] callback once sent or cancelled.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,

    pub program_id: usize,
    pub stream_id: usize,

    /// Data of the buffer, in order.
    pub pages: Vec<ScatterPage>,

    /// Decode timestamp of the data, in 90 kHz ticks.
    pub dts: u64,

    /// Decode duration of the data, in 90 kHz ticks.
    pub dts_duration: u64,

    /// Set the discontinuity indicator on the first packet.
    pub discontinuity: bool,

    pub scrambled: bool,

    /// Scrambled with the odd key rather than the even one.
    pub odd_parity: bool,

    /// A section buffer re-sent every `repeat_interval` ticks until replaced.
    pub repeating: bool,
    pub repeat_interval: u64,

    /// Emit a DIT packet before the data.
    pub request_dit_insertion: bool,
    pub dit_transition_flag: bool,

    /// Set the random access indicator on the first packet (with an inline
    /// PCR on PCR bearing streams).
    pub request_rap_bit: bool,

    /// Little endian index flags reported when the buffer starts being sent.
    pub index_identifier: Vec<u8>,

    /// Opaque caller value, reported when the buffer completes.
    pub user_data: u64,

    pub(crate) progress: Progress,
}
impl Buffer {
    fn new(id: BufferId, pages: Vec<ScatterPage>) -> Self {
        Buffer {
            id,
            program_id: 0,
            stream_id: 0,
            pages,
            dts: 0,
            dts_duration: 0,
            discontinuity: false,
            scrambled: false,
            odd_parity: false,
            repeating: false,
            repeat_interval: 0,
            request_dit_insertion: false,
            dit_transition_flag: false,
            request_rap_bit: false,
            index_identifier: Vec::new(),
            user_data: 0,
            progress: Progress::default(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Total number of data bytes over all pages.
    pub fn size(&self) -> usize {
        self.pages.iter().map(|p| p.data.len()).sum()
    }

    /// Returns `true` if this is an empty "pause" buffer.
    pub fn is_pause(&self) -> bool {
        self.size() == 0
    }

    pub(crate) fn validate(&self) -> Result<()> {
        track_assert!(
            self.size() <= Self::MAX_SIZE,
            ErrorKind::InvalidParameter,
            "Buffer too large: {}",
            self.size()
        );
        track_assert!(
            self.pages.len() <= MAX_SCATTER_PAGES / 4,
            ErrorKind::InvalidParameter,
            "Too many pages: {}",
            self.pages.len()
        );
        track_assert!(
            self.dts <= crate::time::MAX_TIMESTAMP,
            ErrorKind::InvalidParameter,
            "Invalid DTS: {}",
            self.dts
        );
        track_assert!(
            self.dts_duration <= Self::MAX_DTS_DURATION,
            ErrorKind::InvalidParameter,
            "Duration too long: {}",
            self.dts_duration
        );
        track_assert!(
            self.repeat_interval <= Self::MAX_REPEAT_INTERVAL,
            ErrorKind::InvalidParameter,
            "Repeat interval too long: {}",
            self.repeat_interval
        );
        track_assert!(
            self.index_identifier.len() <= MAX_INDEX_IDENTIFIER_SIZE,
            ErrorKind::InvalidParameter,
            "Index identifier too large: {}",
            self.index_identifier.len()
        );
        Ok(())
    }

    pub const MAX_SIZE: usize = 8 * 1024 * 1024;
    pub const MAX_SECTION_SIZE: usize = 4 * 1024;
    pub const MAX_DTS_DURATION: u64 = 100 * 90_000;
    pub const MAX_REPEAT_INTERVAL: u64 = 10 * 90_000;
}

/// Emission state of a queued buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Progress {
    pub number_of_transport_packets: usize,

    /// Packets scheduled so far.
    pub current_transport_packet: usize,

    pub outstanding_dit_request: bool,
    pub outstanding_rap_request: bool,

    /// Bytes not yet rendered; zero before the first packet.
    pub remaining_size: usize,
    pub page: usize,
    pub page_offset: usize,
}

/// A buffer refused by `supply_buffer`, handed back to the caller unchanged.
#[derive(Debug)]
pub struct SupplyError {
    pub error: Error,
    pub buffer: Buffer,
}
impl SupplyError {
    pub fn kind(&self) -> &ErrorKind {
        self.error.kind()
    }
}
impl fmt::Display for SupplyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Buffer {} rejected: {}", self.buffer.id().as_usize(), self.error)
    }
}
impl Trackable for SupplyError {
    type Event = Location;

    fn history(&self) -> Option<&History<Location>> {
        self.error.history()
    }

    fn history_mut(&mut self) -> Option<&mut History<Location>> {
        self.error.history_mut()
    }
}
impl From<SupplyError> for Error {
    fn from(f: SupplyError) -> Self {
        f.error
    }
}

/// Receiver of buffers the multiplexor is done with.
///
/// Called exactly once per accepted buffer, with `cancelled` set when the
/// buffer was withdrawn rather than sent. Implementations typically recycle
/// the structure with [`BufferPool::free_buffer_structure`].
pub trait BufferRelease {
    fn release(&mut self, pool: &BufferPool, cancelled: bool, buffer: Buffer);
}
impl<F> BufferRelease for F
where
    F: FnMut(&BufferPool, bool, Buffer),
{
    fn release(&mut self, pool: &BufferPool, cancelled: bool, buffer: Buffer) {
        self(pool, cancelled, buffer)
    }
}

/// Shared pool of buffer and scatter page structures.
///
/// Guarded by its own lock, so that release callbacks running inside a
/// multiplexor operation can return structures.
pub struct BufferPool {
    free: Mutex<FreeStructures>,
}
struct FreeStructures {
    buffers: Ring<BufferId>,
    pages: Ring<PageId>,
}
impl BufferPool {
    pub(crate) fn new() -> Self {
        let mut buffers = Ring::new(MAX_BUFFERS);
        for i in 0..MAX_BUFFERS {
            let _ = buffers.insert(BufferId(i));
        }
        let mut pages = Ring::new(MAX_SCATTER_PAGES);
        for i in 0..MAX_SCATTER_PAGES {
            let _ = pages.insert(PageId(i));
        }
        BufferPool {
            free: Mutex::new(FreeStructures { buffers, pages }),
        }
    }

    /// Takes a buffer structure with `page_count` empty pages.
    ///
    /// # Errors
    ///
    /// `ErrorKind::AllBuffersInUse` or `ErrorKind::AllPagesInUse` when a pool
    /// is exhausted; nothing is taken in that case.
    pub fn get_buffer_structure(&self, page_count: usize) -> Result<Buffer> {
        track_assert!(
            page_count <= MAX_SCATTER_PAGES / 4,
            ErrorKind::InvalidParameter,
            "Too many pages requested: {}",
            page_count
        );

        let mut free = track!(lock(&self.free))?;
        let id = match free.buffers.extract() {
            Ok(id) => id,
            Err(_) => {
                error!("No free buffer structures");
                track_panic!(ErrorKind::AllBuffersInUse);
            }
        };

        let mut pages = Vec::with_capacity(page_count);
        while pages.len() < page_count {
            match free.pages.extract() {
                Ok(page) => pages.push(page),
                Err(_) => {
                    error!("No free scatter page structures");
                    for page in pages {
                        let _ = free.pages.insert(page);
                    }
                    let _ = free.buffers.insert(id);
                    track_panic!(ErrorKind::AllPagesInUse);
                }
            }
        }

        let pages = pages
            .into_iter()
            .map(|id| ScatterPage {
                id,
                data: Vec::new(),
            })
            .collect();
        Ok(Buffer::new(id, pages))
    }

    /// Returns a buffer structure and its pages to the pool.
    pub fn free_buffer_structure(&self, buffer: Buffer) -> Result<()> {
        let mut free = track!(lock(&self.free))?;
        for page in buffer.pages {
            if free.pages.insert(page.id).is_err() {
                error!("Overflow on scatter page storage ring");
            }
        }
        if free.buffers.insert(buffer.id).is_err() {
            error!("Overflow on buffer storage ring");
            track_panic!(ErrorKind::Error, "Buffer structure {} freed twice", buffer.id.0);
        }
        Ok(())
    }

    /// Number of buffer structures available.
    pub fn free_buffers(&self) -> Result<usize> {
        Ok(track!(lock(&self.free))?.buffers.len())
    }

    /// Number of scatter page structures available.
    pub fn free_pages(&self) -> Result<usize> {
        Ok(track!(lock(&self.free))?.pages.len())
    }
}
impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BufferPool {{ .. }}")
    }
}
