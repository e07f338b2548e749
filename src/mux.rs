//! Transport stream multiplexor.
//!
//! A [`Multiplexor`] interleaves the buffers supplied for up to
//! [`MAX_PROGRAMS`] programs of up to [`MAX_STREAMS_PER_PROGRAM`] streams into
//! one transport stream, one PCR period at a time:
//!
//! 1. [`Multiplexor::supply_buffer`] queues elementary stream (PES) or
//!    section data for a stream.
//! 2. [`Multiplexor::prepare_output`] decides the packets of the coming PCR
//!    period, keeping each decoder bit buffer near its target level.
//! 3. [`Multiplexor::perform_output`] renders those packets into the
//!    caller's sink and releases the buffers that were fully sent.
use std::sync::{Mutex, MutexGuard};

use crate::{Error, ErrorKind, Result};

pub use self::buffer::{Buffer, BufferId, BufferPool, BufferRelease, PageId, ScatterPage,
                       SupplyError};
pub use self::config::{Capabilities, MultiplexorConfig, OutputParameters, ProgramParameters,
                       StreamParameters};
pub use self::context::Multiplexor;
pub use self::multiplex::{OutputCode, TableCode};
pub use self::status::{IndexFlags, IndexRecord, OutputStatus};

mod buffer;
mod config;
mod context;
mod multiplex;
mod output;
mod pcr;
mod schedule;
mod state;
mod status;
mod tables;

/// Number of program slots.
pub const MAX_PROGRAMS: usize = 4;

/// Number of stream slots in each program.
pub const MAX_STREAMS_PER_PROGRAM: usize = 7;

/// Number of buffer structures shared by all streams.
pub const MAX_BUFFERS: usize = 512;

/// Number of scatter page structures shared by all buffers.
pub const MAX_SCATTER_PAGES: usize = 2048;

/// Maximum length of provider and service names.
pub const MAX_NAME_SIZE: usize = 16;

/// Maximum size of program and stream descriptors.
pub const MAX_DESCRIPTOR_SIZE: usize = 16;

/// Maximum size of a buffer's index identifier.
pub const MAX_INDEX_IDENTIFIER_SIZE: usize = 8;

/// Capacity of each stream's bit-buffer expiry log.
pub(crate) const BIT_BUFFER_EXPIRY_RECORDS: usize = MAX_BUFFERS + 1;

/// Bits of one full packet payload.
pub(crate) const PAYLOAD_BITS: i64 = 184 * 8;

/// Bit-buffer level the scheduler aims for: 75% of the capacity.
pub(crate) fn desired_bit_buffer_level(size: u32) -> i64 {
    i64::from(size) * 3 / 4
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<T>> {
    mutex.lock().map_err(|_| {
        use trackable::error::ErrorKindExt;
        track!(Error::from(ErrorKind::Error.cause("Lock poisoned")))
    })
}
