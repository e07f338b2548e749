use std::collections::VecDeque;
use std::sync::Arc;

use crate::mux::buffer::{Buffer, BufferId, BufferPool, BufferRelease, Progress, SupplyError};
use crate::mux::config::{MultiplexorConfig, ProgramParameters, StreamParameters};
use crate::mux::multiplex::OutputCode;
use crate::mux::status::IndexRecord;
use crate::mux::{BIT_BUFFER_EXPIRY_RECORDS, MAX_PROGRAMS, MAX_STREAMS_PER_PROGRAM, PAYLOAD_BITS};
use crate::ring::Ring;
use crate::time::{in_time_period, pcr_limit, ClockReference};
use crate::ts::{ContinuityCounter, Pid, TablePacket, TsPacket};
use crate::{ErrorKind, Result};

#[derive(Debug)]
pub(crate) struct Program {
    pub params: ProgramParameters,
    pub pmt_packet: TablePacket,
}

/// Bits leaving a decoder bit buffer at `dts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BitBufferExpiry {
    pub dts: u64,
    pub bits: i64,
}

#[derive(Debug)]
pub(crate) struct Stream {
    pub params: StreamParameters,
    pub buffers: VecDeque<Buffer>,

    /// Position in `buffers` of the buffer being scheduled.
    pub multiplex_cursor: usize,

    pub continuity_counter: ContinuityCounter,

    /// Modelled decoder bit-buffer occupancy, in bits.
    pub bit_buffer_level: i64,
    pub bit_buffer_expiry: Ring<BitBufferExpiry>,

    pub last_queued_dts: Option<u64>,
    pub paused: bool,
}
impl Stream {
    fn new(params: StreamParameters) -> Self {
        Stream {
            params,
            buffers: VecDeque::new(),
            multiplex_cursor: 0,
            continuity_counter: ContinuityCounter::new(),
            bit_buffer_level: 0,
            bit_buffer_expiry: Ring::new(BIT_BUFFER_EXPIRY_RECORDS),
            last_queued_dts: None,
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused || self.buffers.front().map_or(false, |b| b.is_pause())
    }

    pub fn decoder_bit_buffer_size(&self) -> i64 {
        i64::from(self.params.decoder_bit_buffer_size)
    }
}

/// Session clock.
///
/// `initial_pcr + pcr_offset` is the PCR of the pass being prepared;
/// `shift` moves every emitted time so that the first pass starts near zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Clock {
    pub initialized: bool,
    pub initial_pcr: u64,
    pub pcr_offset: u64,
    pub shift: u64,
}
impl Clock {
    pub fn current_pcr(&self) -> u64 {
        pcr_limit(self.initial_pcr.wrapping_add(self.pcr_offset))
    }
}

/// Packets decided by `prepare_output`, waiting to be rendered.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    pub codes: Vec<OutputCode>,
    pub pcr: u64,
    pub bitrate: u64,
}

pub(crate) struct State {
    pub config: MultiplexorConfig,
    pub pool: Arc<BufferPool>,
    release: Box<dyn BufferRelease + Send>,

    pub programs: Vec<Option<Program>>,
    pub streams: Vec<Vec<Option<Stream>>>,

    /// Used streams in program/stream order, rebuilt with the tables.
    pub packed_streams: Vec<(usize, usize)>,
    pub pmt_count: usize,
    pub regenerate_tables: bool,

    pub pat_packet: TablePacket,
    pub sdt_packet: TablePacket,
    pub dit_packet: TablePacket,

    pub clock: Clock,
    pub flushing: bool,

    /// Stream found short of data by the latest `prepare_output`.
    pub underflow: Option<(usize, usize)>,

    /// PAT/PMT/SDT blocks in the pass being prepared.
    pub table_blocks: usize,
    pub output_packets: usize,
    pub bitrate: u64,
    pub total_packet_count: u64,
    pub index_records: Vec<IndexRecord>,

    pub schedule: Option<Schedule>,
}
impl State {
    pub fn new(
        config: MultiplexorConfig,
        pool: Arc<BufferPool>,
        release: Box<dyn BufferRelease + Send>,
    ) -> Self {
        State {
            config,
            pool,
            release,
            programs: (0..MAX_PROGRAMS).map(|_| None).collect(),
            streams: (0..MAX_PROGRAMS)
                .map(|_| (0..MAX_STREAMS_PER_PROGRAM).map(|_| None).collect())
                .collect(),
            packed_streams: Vec::new(),
            pmt_count: 0,
            regenerate_tables: true,
            pat_packet: TablePacket::new(Pid::PAT),
            sdt_packet: TablePacket::new(Pid::SDT),
            dit_packet: TablePacket::new(Pid::DIT),
            clock: Clock::default(),
            flushing: false,
            underflow: None,
            table_blocks: 0,
            output_packets: 0,
            bitrate: 0,
            total_packet_count: 0,
            index_records: Vec::new(),
            schedule: None,
        }
    }

    pub fn program(&self, program_id: usize) -> Option<&Program> {
        self.programs.get(program_id).and_then(|p| p.as_ref())
    }

    pub fn stream(&self, program_id: usize, stream_id: usize) -> Option<&Stream> {
        self.streams
            .get(program_id)
            .and_then(|s| s.get(stream_id))
            .and_then(|s| s.as_ref())
    }

    pub fn stream_mut(&mut self, program_id: usize, stream_id: usize) -> Option<&mut Stream> {
        self.streams
            .get_mut(program_id)
            .and_then(|s| s.get_mut(stream_id))
            .and_then(|s| s.as_mut())
    }

    pub fn is_tables_program(&self, program_id: usize) -> bool {
        self.program(program_id)
            .map_or(false, |p| p.params.tables_program)
    }

    pub fn release_buffer(&mut self, cancelled: bool, buffer: Buffer) {
        self.release.release(&self.pool, cancelled, buffer);
    }

    /// `params` must have been validated.
    pub fn add_program(&mut self, params: ProgramParameters) -> Result<()> {
        track_assert!(
            self.programs[params.program_id].is_none(),
            ErrorKind::IdInUse,
            "Program {} already in use",
            params.program_id
        );

        let pmt_packet = TablePacket::new(params.pmt_pid);
        let program_id = params.program_id;
        self.programs[program_id] = Some(Program { params, pmt_packet });
        self.regenerate_tables = true;
        Ok(())
    }

    pub fn remove_program(&mut self, program_id: usize) -> Result<()> {
        track_assert!(
            program_id < MAX_PROGRAMS,
            ErrorKind::InvalidParameter,
            "Invalid program id: {}",
            program_id
        );
        track_assert!(
            self.programs[program_id].is_some(),
            ErrorKind::UnrecognisedId,
            "Program {} not in use",
            program_id
        );

        for stream_id in 0..MAX_STREAMS_PER_PROGRAM {
            if self.stream(program_id, stream_id).is_some() {
                track!(self.remove_stream(program_id, stream_id))?;
            }
        }
        self.programs[program_id] = None;
        self.regenerate_tables = true;
        Ok(())
    }

    /// `params` must have been validated.
    pub fn add_stream(&mut self, params: StreamParameters) -> Result<()> {
        track_assert!(
            self.program(params.program_id).is_some(),
            ErrorKind::UnrecognisedId,
            "Program {} not in use",
            params.program_id
        );
        let slot = &mut self.streams[params.program_id][params.stream_id];
        track_assert!(
            slot.is_none(),
            ErrorKind::IdInUse,
            "Stream {}:{} already in use",
            params.program_id,
            params.stream_id
        );

        *slot = Some(Stream::new(params));
        self.regenerate_tables = true;
        Ok(())
    }

    pub fn remove_stream(&mut self, program_id: usize, stream_id: usize) -> Result<()> {
        track_assert!(
            program_id < MAX_PROGRAMS && stream_id < MAX_STREAMS_PER_PROGRAM,
            ErrorKind::InvalidParameter,
            "Invalid stream id: {}:{}",
            program_id,
            stream_id
        );
        let stream = track_assert_some!(
            self.streams[program_id][stream_id].take(),
            ErrorKind::UnrecognisedId,
            "Stream {}:{} not in use",
            program_id,
            stream_id
        );

        for buffer in stream.buffers {
            self.release_buffer(true, buffer);
        }
        self.regenerate_tables = true;
        Ok(())
    }

    /// Queues `buffer` on its stream.
    ///
    /// A rejected buffer is returned untouched inside the error.
    pub fn supply_buffer(&mut self, buffer: Buffer) -> std::result::Result<(), SupplyError> {
        match self.check_buffer(&buffer) {
            Ok(packets) => {
                self.enqueue_buffer(buffer, packets);
                Ok(())
            }
            Err(e) => Err(SupplyError {
                error: track!(e),
                buffer,
            }),
        }
    }

    // Validates the buffer against its stream and returns the number of
    // transport packets it will occupy.
    fn check_buffer(&self, buffer: &Buffer) -> Result<usize> {
        track!(buffer.validate())?;
        track_assert!(
            buffer.program_id < MAX_PROGRAMS && buffer.stream_id < MAX_STREAMS_PER_PROGRAM,
            ErrorKind::InvalidParameter,
            "Invalid stream id: {}:{}",
            buffer.program_id,
            buffer.stream_id
        );
        let stream = track_assert_some!(
            self.stream(buffer.program_id, buffer.stream_id),
            ErrorKind::UnrecognisedId,
            "Stream {}:{} not in use",
            buffer.program_id,
            buffer.stream_id
        );

        let size = buffer.size();
        track_assert!(
            stream.params.stream_pes || size <= Buffer::MAX_SECTION_SIZE,
            ErrorKind::InvalidParameter,
            "Section buffer larger than 4k: {}",
            size
        );

        let threshold = stream.params.dts_integrity_threshold;
        if threshold != 0 && size != 0 && !buffer.repeating {
            if let Some(last) = stream.last_queued_dts {
                if !stream.is_paused()
                    && !in_time_period(buffer.dts, last, pcr_limit(last + threshold))
                {
                    error!(
                        "DTS integrity check failed on stream {}:{} (last={:#011x}, this={:#011x})",
                        buffer.program_id, buffer.stream_id, last, buffer.dts
                    );
                    track_panic!(ErrorKind::DtsIntegrityFailure);
                }
            } else {
                self.check_dts_against_other_streams(buffer, threshold);
            }
        }

        let packets = if size != 0 {
            let mut unpadded = size;
            if buffer.discontinuity || buffer.request_rap_bit {
                unpadded += 2;
            }
            if !stream.params.stream_pes {
                unpadded += 1; // pointer_field
            }
            if buffer.request_rap_bit && stream.params.incorporate_pcr_packet {
                unpadded += ClockReference::PCR_SIZE;
            }
            (unpadded + TsPacket::MAX_PAYLOAD_SIZE - 1) / TsPacket::MAX_PAYLOAD_SIZE
        } else {
            debug!(
                "Received pause buffer on stream {}:{}",
                buffer.program_id, buffer.stream_id
            );
            0
        };

        if stream.params.stream_pes {
            track_assert!(
                packets as i64 * PAYLOAD_BITS <= stream.decoder_bit_buffer_size(),
                ErrorKind::BitBufferViolation,
                "Buffer larger than the decoder bit buffer: {} bytes",
                size
            );
        }
        Ok(packets)
    }

    fn check_dts_against_other_streams(&self, buffer: &Buffer, threshold: u64) {
        let others = self.streams.iter().flatten().filter_map(|s| s.as_ref());
        for other in others {
            let head = match other.buffers.front() {
                Some(head) => head,
                None => continue,
            };
            if head.is_pause() || head.repeating || (!other.params.stream_pes && head.dts == 0) {
                continue;
            }
            let threshold = threshold.max(other.params.dts_integrity_threshold);
            let start = pcr_limit(head.dts.wrapping_sub(threshold));
            let end = pcr_limit(head.dts + threshold);
            if !in_time_period(buffer.dts, start, end) {
                warn!(
                    "DTS of stream {}:{} far from stream {}:{} (other={:#011x}, this={:#011x})",
                    buffer.program_id,
                    buffer.stream_id,
                    other.params.program_id,
                    other.params.stream_id,
                    head.dts,
                    buffer.dts
                );
            }
        }
    }

    fn enqueue_buffer(&mut self, mut buffer: Buffer, packets: usize) {
        buffer.progress = Progress {
            number_of_transport_packets: packets,
            outstanding_dit_request: buffer.request_dit_insertion,
            outstanding_rap_request: buffer.request_rap_bit,
            ..Progress::default()
        };
        let repeat_dts = if self.clock.initialized {
            self.clock.current_pcr()
        } else {
            0
        };
        let (program_id, stream_id) = (buffer.program_id, buffer.stream_id);
        let size = buffer.size();
        let repeating = buffer.repeating;
        let dts = buffer.dts;

        let mut released = Vec::new();
        if let Some(stream) = self.stream_mut(program_id, stream_id) {
            if !stream.params.stream_pes && repeating {
                released.extend(stream.buffers.drain(..));
                buffer.dts = repeat_dts;
            } else {
                if !stream.params.stream_pes && stream.buffers.front().map_or(false, |b| b.repeating) {
                    released.extend(stream.buffers.pop_front());
                }

                // Only the last queued buffer can be a pause
                let trailing_pause = stream
                    .buffers
                    .back()
                    .map_or(false, |b| b.progress.number_of_transport_packets == 0);
                if trailing_pause {
                    debug!("Clearing pause buffer on stream {}:{}", program_id, stream_id);
                    released.extend(stream.buffers.pop_back());
                }
            }
            stream.buffers.push_back(buffer);

            if size != 0 {
                stream.last_queued_dts = if repeating { None } else { Some(dts) };
                stream.paused = false;
            } else {
                stream.paused = true;
            }
        }

        for buffer in released {
            self.release_buffer(false, buffer);
        }
    }

    /// Withdraws a queued buffer.
    ///
    /// Packets of the buffer already scheduled or sent are not taken back.
    pub fn cancel_buffer(&mut self, id: BufferId) -> Result<()> {
        let mut found = None;
        for stream in self.streams.iter_mut().flatten().filter_map(|s| s.as_mut()) {
            if let Some(i) = stream.buffers.iter().position(|b| b.id() == id) {
                found = stream.buffers.remove(i);
                break;
            }
        }
        let buffer = track_assert_some!(
            found,
            ErrorKind::UnrecognisedId,
            "Buffer {} not attached to any stream",
            id.as_usize()
        );
        let progress = &buffer.progress;
        if progress.current_transport_packet != 0 || progress.remaining_size != 0 {
            warn!(
                "Cancelled buffer {} of stream {}:{} part way through ({} of {} packets scheduled)",
                id.as_usize(),
                buffer.program_id,
                buffer.stream_id,
                progress.current_transport_packet,
                progress.number_of_transport_packets
            );
        }
        self.release_buffer(true, buffer);
        Ok(())
    }

    pub fn remove_all_programs(&mut self) -> Result<()> {
        for program_id in 0..MAX_PROGRAMS {
            if self.programs[program_id].is_some() {
                track!(self.remove_program(program_id))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::es::StreamType;

    pub type Released = Arc<Mutex<Vec<(bool, u64)>>>;

    pub fn state(config: MultiplexorConfig) -> (State, Released) {
        let released = Released::default();
        let log = released.clone();
        let release = move |pool: &BufferPool, cancelled: bool, buffer: Buffer| {
            log.lock().unwrap().push((cancelled, buffer.user_data));
            pool.free_buffer_structure(buffer).unwrap();
        };
        let state = State::new(config, Arc::new(BufferPool::new()), Box::new(release));
        (state, released)
    }

    pub fn pes_stream(program_id: usize, stream_id: usize, pid: u16) -> StreamParameters {
        StreamParameters {
            program_id,
            stream_id,
            stream_pes: true,
            stream_pid: Pid::new(pid).unwrap(),
            stream_type: StreamType::H264,
            incorporate_pcr_packet: false,
            descriptor: Vec::new(),
            decoder_bit_buffer_size: 2_000_000,
            multiplex_ahead_limit: 0,
            dts_integrity_threshold: 0,
        }
    }

    pub fn buffer(state: &State, stream: (usize, usize), size: usize, dts: u64) -> Buffer {
        let mut buffer = state.pool.get_buffer_structure(1).unwrap();
        buffer.program_id = stream.0;
        buffer.stream_id = stream.1;
        buffer.pages[0].data = vec![0; size];
        buffer.dts = dts;
        buffer.user_data = dts;
        buffer
    }

    fn kind<T>(r: Result<T>) -> Option<ErrorKind> {
        r.err().map(|e| *e.kind())
    }

    fn rejected(r: std::result::Result<(), SupplyError>) -> (ErrorKind, Buffer) {
        let e = r.err().unwrap();
        (*e.kind(), e.buffer)
    }

    #[test]
    fn program_and_stream_slots() {
        let (mut state, _) = state(MultiplexorConfig::default());
        assert_eq!(kind(state.add_stream(pes_stream(0, 0, 0x100))), Some(ErrorKind::UnrecognisedId));

        state.add_program(ProgramParameters::default()).unwrap();
        assert_eq!(kind(state.add_program(ProgramParameters::default())), Some(ErrorKind::IdInUse));

        state.add_stream(pes_stream(0, 0, 0x100)).unwrap();
        assert_eq!(kind(state.add_stream(pes_stream(0, 0, 0x101))), Some(ErrorKind::IdInUse));

        state.regenerate_tables = false;
        state.remove_stream(0, 0).unwrap();
        assert!(state.regenerate_tables);
        assert_eq!(kind(state.remove_stream(0, 0)), Some(ErrorKind::UnrecognisedId));
        assert_eq!(kind(state.remove_program(1)), Some(ErrorKind::UnrecognisedId));
    }

    #[test]
    fn packet_count_of_supplied_buffers() {
        let (mut state, _) = state(MultiplexorConfig::default());
        state.add_program(ProgramParameters::default()).unwrap();
        let mut params = pes_stream(0, 0, 0x100);
        params.incorporate_pcr_packet = true;
        state.add_stream(params).unwrap();

        let b = buffer(&state, (0, 0), 184, 0);
        state.supply_buffer(b).unwrap();

        let mut b = buffer(&state, (0, 0), 184, 0);
        b.request_rap_bit = true;
        state.supply_buffer(b).unwrap();

        let b = buffer(&state, (0, 0), 185, 0);
        state.supply_buffer(b).unwrap();

        let counts: Vec<_> = state.stream(0, 0).unwrap().buffers.iter()
            .map(|b| b.progress.number_of_transport_packets)
            .collect();
        assert_eq!(counts, vec![1, 2, 2]);
    }

    #[test]
    fn rejected_buffer_is_handed_back() {
        let (mut state, released) = state(MultiplexorConfig::default());
        state.add_program(ProgramParameters::default()).unwrap();
        let mut params = pes_stream(0, 0, 0x100);
        params.decoder_bit_buffer_size = 184 * 8;
        state.add_stream(params).unwrap();

        let b = buffer(&state, (0, 0), 200, 7);
        let id = b.id();
        let (kind, mut b) = rejected(state.supply_buffer(b));
        assert_eq!(kind, ErrorKind::BitBufferViolation);
        assert_eq!(b.id(), id);
        assert_eq!(b.user_data, 7);
        assert_eq!(b.pages[0].data.len(), 200);

        b.stream_id = 3;
        let (kind, mut b) = rejected(state.supply_buffer(b));
        assert_eq!(kind, ErrorKind::UnrecognisedId);
        assert!(released.lock().unwrap().is_empty());
        assert_eq!(state.pool.free_buffers().unwrap(), crate::mux::MAX_BUFFERS - 1);

        // Fixed up and resupplied
        b.stream_id = 0;
        b.pages[0].data.truncate(100);
        state.supply_buffer(b).unwrap();
        assert_eq!(state.stream(0, 0).unwrap().buffers.len(), 1);
        assert!(released.lock().unwrap().is_empty());
    }

    #[test]
    fn dts_integrity() {
        let (mut state, _) = state(MultiplexorConfig::default());
        state.add_program(ProgramParameters::default()).unwrap();
        let mut params = pes_stream(0, 0, 0x100);
        params.dts_integrity_threshold = 9000;
        state.add_stream(params).unwrap();

        let b = buffer(&state, (0, 0), 10, 1000);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 0), 10, 4000);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 0), 10, 20_000);
        let (kind, b) = rejected(state.supply_buffer(b));
        assert_eq!(kind, ErrorKind::DtsIntegrityFailure);

        // A pause lifts the check.
        let pause = buffer(&state, (0, 0), 0, 0);
        state.supply_buffer(pause).unwrap();
        state.supply_buffer(b).unwrap();
    }

    #[test]
    fn pause_buffer_is_replaced() {
        let (mut state, released) = state(MultiplexorConfig::default());
        state.add_program(ProgramParameters::default()).unwrap();
        state.add_stream(pes_stream(0, 0, 0x100)).unwrap();

        let b = buffer(&state, (0, 0), 0, 1);
        state.supply_buffer(b).unwrap();
        assert!(state.stream(0, 0).unwrap().is_paused());

        let b = buffer(&state, (0, 0), 100, 2);
        state.supply_buffer(b).unwrap();
        assert_eq!(*released.lock().unwrap(), vec![(false, 1)]);
        let stream = state.stream(0, 0).unwrap();
        assert_eq!(stream.buffers.len(), 1);
        assert!(!stream.is_paused());
    }

    #[test]
    fn section_pause_is_replaced() {
        let (mut state, released) = state(MultiplexorConfig::default());
        state.add_program(ProgramParameters::default()).unwrap();
        let mut params = pes_stream(0, 0, 0x100);
        params.stream_pes = false;
        state.add_stream(params).unwrap();

        let b = buffer(&state, (0, 0), 0, 1);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 0), 100, 2);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 0), 100, 3);
        state.supply_buffer(b).unwrap();

        assert_eq!(*released.lock().unwrap(), vec![(false, 1)]);
        let user_data: Vec<_> = state.stream(0, 0).unwrap().buffers.iter().map(|b| b.user_data).collect();
        assert_eq!(user_data, vec![2, 3]);
    }

    #[test]
    fn cancel_and_remove() {
        let (mut state, released) = state(MultiplexorConfig::default());
        state.add_program(ProgramParameters::default()).unwrap();
        state.add_stream(pes_stream(0, 0, 0x100)).unwrap();

        let mut ids = Vec::new();
        for dts in 0..3 {
            let b = buffer(&state, (0, 0), 100, dts);
            ids.push(b.id());
            state.supply_buffer(b).unwrap();
        }
        state.cancel_buffer(ids[1]).unwrap();
        assert_eq!(kind(state.cancel_buffer(ids[1])), Some(ErrorKind::UnrecognisedId));

        state.remove_all_programs().unwrap();
        assert_eq!(*released.lock().unwrap(), vec![(true, 1), (true, 0), (true, 2)]);
        assert!(state.program(0).is_none());
    }

    #[test]
    fn cancel_partly_sent_head() {
        let (mut state, released) = state(MultiplexorConfig::default());
        state.add_program(ProgramParameters::default()).unwrap();
        state.add_stream(pes_stream(0, 0, 0x100)).unwrap();

        let b = buffer(&state, (0, 0), 400, 5);
        let id = b.id();
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 0), 100, 6);
        state.supply_buffer(b).unwrap();
        state.stream_mut(0, 0).unwrap().buffers[0].progress.current_transport_packet = 1;

        state.cancel_buffer(id).unwrap();
        assert_eq!(*released.lock().unwrap(), vec![(true, 5)]);
        let stream = state.stream(0, 0).unwrap();
        assert_eq!(stream.buffers.len(), 1);
        assert_eq!(stream.buffers[0].user_data, 6);
    }
}
