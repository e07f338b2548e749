use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::mux::buffer::{Buffer, BufferId, BufferPool, BufferRelease, SupplyError};
use crate::mux::config::{Capabilities, MultiplexorConfig, OutputParameters, ProgramParameters,
                         StreamParameters};
use crate::mux::multiplex::OutputCode;
use crate::mux::state::State;
use crate::mux::status::OutputStatus;
use crate::mux::lock;
use crate::Result;

/// One multiplexing session.
///
/// Every method takes the session lock, so a `Multiplexor` may be shared
/// between threads. Buffer structures are handed out by a separate
/// [`BufferPool`] that the release callback can use while the session lock
/// is held.
///
/// # Examples
///
/// ```
/// use mpeg2ts_mux::mux::{Buffer, BufferPool, Multiplexor, MultiplexorConfig, OutputParameters,
///                        OutputStatus, ProgramParameters, StreamParameters};
/// use mpeg2ts_mux::es::StreamType;
/// use mpeg2ts_mux::ts::Pid;
///
/// let release = |pool: &BufferPool, _cancelled: bool, buffer: Buffer| {
///     let _ = pool.free_buffer_structure(buffer);
/// };
/// let mux = Multiplexor::open(MultiplexorConfig::default(), release).unwrap();
/// mux.add_program(ProgramParameters::default()).unwrap();
/// mux.add_stream(StreamParameters {
///     program_id: 0,
///     stream_id: 0,
///     stream_pes: true,
///     stream_pid: Pid::new(0x101).unwrap(),
///     stream_type: StreamType::H264,
///     incorporate_pcr_packet: true,
///     descriptor: Vec::new(),
///     decoder_bit_buffer_size: 1_000_000,
///     multiplex_ahead_limit: 0,
///     dts_integrity_threshold: 0,
/// }).unwrap();
///
/// let params = OutputParameters { output_size: 1 << 20, flush: true };
/// let mut status = OutputStatus::default();
/// mux.prepare_output(&params, &mut status).unwrap();
///
/// let mut ts = Vec::new();
/// mux.perform_output(&mut ts, &mut status).unwrap();
/// assert_eq!(ts.len(), status.output_packets * 188);
/// mux.close().unwrap();
/// ```
pub struct Multiplexor {
    state: Mutex<State>,
    pool: Arc<BufferPool>,
}
impl Multiplexor {
    /// Returns the sizing limits of the multiplexor.
    pub fn capabilities() -> Capabilities {
        Capabilities::get()
    }

    /// Opens a session.
    ///
    /// `release` is called exactly once for every buffer the session
    /// accepted: with `cancelled == false` once the buffer has been output
    /// completely, otherwise when it was cancelled or discarded with its
    /// stream.
    pub fn open<R>(config: MultiplexorConfig, release: R) -> Result<Self>
    where
        R: BufferRelease + Send + 'static,
    {
        track!(config.validate())?;
        let pool = Arc::new(BufferPool::new());
        let state = State::new(config, pool.clone(), Box::new(release));
        Ok(Multiplexor {
            state: Mutex::new(state),
            pool,
        })
    }

    /// Removes every program, releasing all queued buffers as cancelled.
    pub fn close(self) -> Result<()> {
        let mut state = track!(lock(&self.state))?;
        track!(state.remove_all_programs())
    }

    /// Returns the pool the buffer structures of this session come from.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Registers a program in the slot `params.program_id`.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::InvalidParameter`: the id or the PMT PID is out of range,
    ///   or a name or the descriptor is too long.
    /// - `ErrorKind::IdInUse`: the slot is already occupied.
    pub fn add_program(&self, params: ProgramParameters) -> Result<()> {
        track!(params.validate())?;
        let mut state = track!(lock(&self.state))?;
        track!(state.add_program(params))
    }

    /// Removes a program and every stream of it.
    pub fn remove_program(&self, program_id: usize) -> Result<()> {
        let mut state = track!(lock(&self.state))?;
        track!(state.remove_program(program_id))
    }

    /// Registers a stream of an existing program.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::InvalidParameter`: an id, the PID, the decoder buffer
    ///   size or the descriptor is out of range.
    /// - `ErrorKind::UnrecognisedId`: the program is not registered.
    /// - `ErrorKind::IdInUse`: the stream slot is already occupied.
    pub fn add_stream(&self, params: StreamParameters) -> Result<()> {
        track!(params.validate())?;
        let mut state = track!(lock(&self.state))?;
        track!(state.add_stream(params))
    }

    /// Removes a stream, cancelling its queued buffers.
    pub fn remove_stream(&self, program_id: usize, stream_id: usize) -> Result<()> {
        let mut state = track!(lock(&self.state))?;
        track!(state.remove_stream(program_id, stream_id))
    }

    /// Takes a free buffer structure with `page_count` scatter pages.
    pub fn get_buffer_structure(&self, page_count: usize) -> Result<Buffer> {
        track!(self.pool.get_buffer_structure(page_count))
    }

    /// Returns a buffer structure that was never supplied.
    pub fn free_buffer_structure(&self, buffer: Buffer) -> Result<()> {
        track!(self.pool.free_buffer_structure(buffer))
    }

    /// Queues a buffer on its stream.
    ///
    /// # Errors
    ///
    /// A rejected buffer is not queued and comes back in
    /// [`SupplyError::buffer`], so that the caller may fix and resupply it.
    /// The release callback is not called for it.
    pub fn supply_buffer(&self, buffer: Buffer) -> std::result::Result<(), SupplyError> {
        let mut state = match lock(&self.state) {
            Ok(state) => state,
            Err(e) => {
                return Err(SupplyError {
                    error: track!(e),
                    buffer,
                })
            }
        };
        track!(state.supply_buffer(buffer))
    }

    /// Withdraws a queued buffer, releasing it as cancelled.
    pub fn cancel_buffer(&self, id: BufferId) -> Result<()> {
        let mut state = track!(lock(&self.state))?;
        track!(state.cancel_buffer(id))
    }

    /// Decides the packets of the coming PCR period.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::InputUnderflow`: a stream lacks data for the period
    ///   (reported in `status.input_underflow`); nothing is prepared.
    /// - `ErrorKind::OutputOverflow`: `params.output_size` cannot hold the
    ///   pass (the size needed is in `status.overflow_output_size`).
    /// - `ErrorKind::DeliveryFailure`: some buffers will reach the decoder
    ///   late. The pass is prepared anyway.
    pub fn prepare_output(&self, params: &OutputParameters, status: &mut OutputStatus) -> Result<()> {
        let mut state = track!(lock(&self.state))?;
        track!(state.prepare_output(params, status))
    }

    /// Writes the prepared packets to `writer`.
    pub fn perform_output<W: Write>(&self, writer: W, status: &mut OutputStatus) -> Result<()> {
        let mut state = track!(lock(&self.state))?;
        track!(state.perform_output(writer, status))
    }

    /// Returns the packet decisions of the prepared pass, if any.
    pub fn schedule(&self) -> Result<Option<Vec<OutputCode>>> {
        let state = track!(lock(&self.state))?;
        Ok(state.schedule.as_ref().map(|s| s.codes.clone()))
    }
}
impl Drop for Multiplexor {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Err(e) = state.remove_all_programs() {
                warn!("Cannot release queued buffers: {}", e);
            }
        }
    }
}
impl std::fmt::Debug for Multiplexor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Multiplexor {{ pool: {:?}, .. }}", self.pool)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn invalid_config_is_rejected() {
        let config = MultiplexorConfig {
            bitrate: 0,
            ..MultiplexorConfig::default()
        };
        let release = |_: &BufferPool, _: bool, _: Buffer| {};
        assert_eq!(
            Multiplexor::open(config, release).map(|_| ()).map_err(|e| *e.kind()),
            Err(ErrorKind::InvalidParameter)
        );
    }

    #[test]
    fn close_cancels_queued_buffers() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let log = released.clone();
        let release = move |pool: &BufferPool, cancelled: bool, buffer: Buffer| {
            log.lock().unwrap().push((cancelled, buffer.user_data));
            pool.free_buffer_structure(buffer).unwrap();
        };
        let mux = track_try_unwrap!(Multiplexor::open(MultiplexorConfig::default(), release));
        track_try_unwrap!(mux.add_program(ProgramParameters::default()));
        track_try_unwrap!(mux.add_stream(crate::mux::state::test::pes_stream(0, 0, 0x101)));

        let mut buffer = track_try_unwrap!(mux.get_buffer_structure(1));
        buffer.pages[0].data = vec![0; 10];
        buffer.user_data = 42;
        track_try_unwrap!(mux.supply_buffer(buffer));
        assert_eq!(track_try_unwrap!(mux.buffer_pool().free_buffers()), crate::mux::MAX_BUFFERS - 1);

        let mut status = OutputStatus::default();
        assert_eq!(
            mux.perform_output(Vec::new(), &mut status).map_err(|e| *e.kind()),
            Err(ErrorKind::InvalidParameter)
        );

        let pool = mux.buffer_pool().clone();
        track_try_unwrap!(mux.close());
        assert_eq!(*released.lock().unwrap(), vec![(true, 42)]);
        assert_eq!(track_try_unwrap!(pool.free_buffers()), crate::mux::MAX_BUFFERS);
    }
}
