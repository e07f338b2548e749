//! Per-period packet budgets.
//!
//! Before a pass is multiplexed, every stream is asked how many packets it
//! would like to send during the coming PCR period in order to bring its
//! decoder bit buffer to the desired level. The sum decides the output
//! packet count and bitrate of the pass.
use crate::mux::{desired_bit_buffer_level, Buffer};
use crate::mux::state::{State, Stream};
use crate::time::{in_time_period, pcr_limit, time_is_before};
use crate::{Error, ErrorKind, Result};

/// Bits announcing a discontinuity in the adaptation field.
const DISCONTINUITY_BITS: i64 = 16;

const PACKET_PAYLOAD_BITS: i64 = 8 * 184;

impl State {
    /// Decides how many tables blocks, and how many packets in total, the
    /// coming pass contains. Sets `output_packets` and `bitrate`.
    pub fn calculate_bitrate(&mut self) -> Result<()> {
        let pcr_period = self.config.pcr_period;
        let table_period = self.config.table_period;
        self.table_blocks = 0;
        if self.config.generate_pat_pmt && table_period != 0 {
            if table_period <= pcr_period {
                self.table_blocks = ((pcr_period + table_period - 1) / table_period) as usize;
            } else {
                let pcr_periods_per_table = table_period / pcr_period;
                let elapsed_pcr_periods = self.clock.pcr_offset / pcr_period;
                if elapsed_pcr_periods % pcr_periods_per_table == 0 {
                    self.table_blocks = 1;
                }
            }
        }

        let mut total = if self.config.generate_pcr_stream { 1 } else { 0 };
        total += self.table_blocks as i64 * self.table_block_size() as i64;
        for i in 0..self.packed_streams.len() {
            let (program_id, stream_id) = self.packed_streams[i];
            total += track!(self.pcr_period_packets(program_id, stream_id))?;
        }
        let total = total.max(0) as u64;

        let bits_per_packet = self.config.bits_per_packet();
        let allowed = pcr_period * u64::from(self.config.bitrate) / 90_000 / bits_per_packet;
        let output_packets = if self.config.fixed_bitrate {
            allowed
        } else {
            allowed.min(total)
        };
        self.output_packets = output_packets as usize;
        self.bitrate = output_packets * bits_per_packet * 90_000 / pcr_period;
        Ok(())
    }

    /// Packets of one PAT/SDT/PMT block.
    pub fn table_block_size(&self) -> usize {
        1 + if self.config.generate_sdt { 1 } else { 0 } + self.pmt_count
    }

    /// Number of packets a stream wants to send during the coming period,
    /// its PCR packet included. May be negative when the stream is ahead.
    pub fn pcr_period_packets(&mut self, program_id: usize, stream_id: usize) -> Result<i64> {
        let period_start = self.clock.current_pcr();
        let period_end = pcr_limit(period_start + self.config.pcr_period);
        let checks_underflow = !self.flushing && !self.is_tables_program(program_id);

        let stream = track_assert_some!(
            self.stream(program_id, stream_id),
            ErrorKind::UnrecognisedId,
            "Stream {}:{} not in use",
            program_id,
            stream_id
        );
        let scan_limit = pcr_limit(period_end + stream.params.multiplex_ahead_limit);
        let pcr_packets = if stream.params.incorporate_pcr_packet { 1 } else { 0 };

        if let Some(head) = stream.buffers.front() {
            if !stream.params.stream_pes && head.repeating {
                let mut packets = pcr_packets;
                let mut dts = head.dts;
                while in_time_period(dts, period_start, period_end) {
                    packets += head.progress.number_of_transport_packets as i64;
                    dts = pcr_limit(dts + head.repeat_interval);
                    if head.repeat_interval == 0 {
                        break;
                    }
                }
                return Ok(packets);
            }
        }

        let level = bit_buffer_level_after(stream, period_start, period_end);
        if level.exhausted && checks_underflow {
            error!(
                "Ran out of data on stream {}:{} while computing the bits leaving the bit buffer",
                program_id, stream_id
            );
            for b in sending_buffers(stream) {
                debug!("  DTS {:#011x}", b.dts);
            }
            debug!("  Period {:#011x} to {:#011x}", period_start, period_end);
            return Err(track!(self.underflow_error(program_id, stream_id)));
        }
        let level = level.bits;

        // Enough data to fill the whole bit buffer?
        let mut bits_needed = stream.decoder_bit_buffer_size() - level + already_sent_bits(stream);
        let mut exhausted = true;
        for b in sending_buffers(stream) {
            bits_needed -= b.size() as i64 * 8;
            if bits_needed <= 0 || !in_time_period(b.dts, period_start, scan_limit) {
                exhausted = false;
                break;
            }
        }
        if exhausted && !has_pause(stream) && checks_underflow {
            error!(
                "Ran out of data on stream {}:{} while checking bit availability",
                program_id, stream_id
            );
            debug!(
                "  bits_needed={}, period {:#011x} to {:#011x}",
                bits_needed, period_start, scan_limit
            );
            for b in &stream.buffers {
                debug!("  size={}, DTS {:#011x}", b.size(), b.dts);
            }
            return Err(track!(self.underflow_error(program_id, stream_id)));
        }

        // Packets bringing the bit buffer to the desired level
        let mut bits_needed = desired_bit_buffer_level(stream.params.decoder_bit_buffer_size) - level
            + already_sent_bits(stream);
        let mut packets = match stream.buffers.front() {
            Some(head) => -(head.progress.current_transport_packet as i64),
            None => pcr_packets,
        };
        for b in sending_buffers(stream) {
            if b.request_dit_insertion {
                packets += 1;
            }
            let bits = b.size() as i64 * 8;
            if bits_needed >= bits {
                packets += b.progress.number_of_transport_packets as i64;
                bits_needed -= bits;
            } else {
                packets += (bits_needed + 4 * 184) / PACKET_PAYLOAD_BITS;
                break;
            }
            if !in_time_period(b.dts, period_start, scan_limit) {
                break;
            }
        }
        Ok(packets + pcr_packets)
    }

    fn underflow_error(&mut self, program_id: usize, stream_id: usize) -> Error {
        use trackable::error::ErrorKindExt;
        self.underflow = Some((program_id, stream_id));
        ErrorKind::InputUnderflow
            .cause(format!("Input underflow on stream {}:{}", program_id, stream_id))
            .into()
    }
}

struct LevelEstimate {
    bits: i64,

    // The queue ran out without reaching data beyond the period.
    exhausted: bool,
}

// Bit-buffer level at the end of the period, once the data decoded during the
// period has left the buffer.
fn bit_buffer_level_after(stream: &Stream, period_start: u64, period_end: u64) -> LevelEstimate {
    let mut bits = stream.bit_buffer_level;
    for expiry in stream.bit_buffer_expiry.iter() {
        if in_time_period(expiry.dts, period_start, period_end) {
            bits -= expiry.bits;
        }
    }

    let mut exhausted = true;
    for b in sending_buffers(stream) {
        if in_time_period(b.dts, period_start, period_end) {
            bits -= b.size() as i64 * 8;
        } else if time_is_before(b.dts, period_start) {
            warn!(
                "Bit buffer level is too short on stream {}:{}",
                stream.params.program_id, stream.params.stream_id
            );
            bits -= b.size() as i64 * 8;
        } else {
            exhausted = false;
            break;
        }
    }
    if has_pause(stream) {
        exhausted = false;
    }
    LevelEstimate { bits, exhausted }
}

// Queued buffers up to the first pause.
fn sending_buffers<'a>(stream: &'a Stream) -> impl Iterator<Item = &'a Buffer> + 'a {
    stream
        .buffers
        .iter()
        .take_while(|b| b.progress.number_of_transport_packets != 0)
}

fn has_pause(stream: &Stream) -> bool {
    stream
        .buffers
        .iter()
        .any(|b| b.progress.number_of_transport_packets == 0)
}

// Bits of the head buffer already scheduled in earlier passes.
fn already_sent_bits(stream: &Stream) -> i64 {
    match stream.buffers.front() {
        Some(head) if head.progress.current_transport_packet != 0 => {
            let mut bits = head.progress.current_transport_packet as i64 * PACKET_PAYLOAD_BITS;
            if head.discontinuity {
                bits -= DISCONTINUITY_BITS;
            }
            bits
        }
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use crate::mux::config::{MultiplexorConfig, ProgramParameters};
    use crate::mux::state::test::{buffer, pes_stream, state};
    use crate::mux::state::State;
    use crate::ErrorKind;

    const INITIAL_PCR: u64 = 1_000_000;

    fn single_stream_state(config: MultiplexorConfig) -> State {
        let (mut state, _) = state(config);
        state.add_program(ProgramParameters::default()).unwrap();
        let mut video = pes_stream(0, 0, 0x100);
        video.incorporate_pcr_packet = true;
        state.add_stream(video).unwrap();
        state.regenerate_tables().unwrap();
        state.clock.initialized = true;
        state.clock.initial_pcr = INITIAL_PCR;
        state
    }

    fn config() -> MultiplexorConfig {
        MultiplexorConfig {
            pcr_period: 1800,
            bitrate: 2_000_000,
            table_period: 1800,
            ..MultiplexorConfig::default()
        }
    }

    #[test]
    fn packets_to_reach_desired_level() {
        let mut state = single_stream_state(config());
        state.stream_mut(0, 0).unwrap().params.multiplex_ahead_limit = 1_000_000;
        // Desired level is 1,500,000 bits; 2000 bytes buffers are 16,000 bits.
        for i in 0..200 {
            let b = buffer(&state, (0, 0), 2000, INITIAL_PCR + 90_000 + i * 1000);
            state.supply_buffer(b).unwrap();
        }
        let packets = state.pcr_period_packets(0, 0).unwrap();
        // 93 whole buffers of 11 packets, plus (12,000 + 736) / 1472 = 8 packets,
        // plus the PCR packet.
        assert_eq!(packets, 93 * 11 + 8 + 1);
    }

    #[test]
    fn underflow_when_queue_runs_out() {
        let mut state = single_stream_state(config());
        let b = buffer(&state, (0, 0), 2000, INITIAL_PCR + 100);
        state.supply_buffer(b).unwrap();
        assert_eq!(
            state.pcr_period_packets(0, 0).map_err(|e| *e.kind()),
            Err(ErrorKind::InputUnderflow)
        );
        assert_eq!(state.underflow, Some((0, 0)));

        state.flushing = true;
        assert_eq!(state.pcr_period_packets(0, 0).unwrap(), 11 + 1);
    }

    #[test]
    fn pause_buffer_stops_the_walk() {
        let mut state = single_stream_state(config());
        let b = buffer(&state, (0, 0), 2000, INITIAL_PCR + 100);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 0), 0, 0);
        state.supply_buffer(b).unwrap();
        assert_eq!(state.pcr_period_packets(0, 0).unwrap(), 11 + 1);
    }

    #[test]
    fn free_and_fixed_bitrate() {
        let mut state = single_stream_state(config());
        state.flushing = true;
        let b = buffer(&state, (0, 0), 1000, INITIAL_PCR + 90_000);
        state.supply_buffer(b).unwrap();

        state.calculate_bitrate().unwrap();
        assert_eq!(state.table_blocks, 1);
        // PAT + PMT, six data packets and the PCR packet.
        assert_eq!(state.output_packets, 2 + 6 + 1);
        assert_eq!(state.bitrate, 9 * 1504 * 90_000 / 1800);

        state.config.fixed_bitrate = true;
        state.calculate_bitrate().unwrap();
        assert_eq!(state.output_packets, 26);
        assert_eq!(state.bitrate, 26 * 1504 * 50);
    }

    #[test]
    fn tables_every_other_period() {
        let mut state = single_stream_state(MultiplexorConfig {
            table_period: 3600,
            ..config()
        });
        state.flushing = true;
        state.calculate_bitrate().unwrap();
        assert_eq!(state.table_blocks, 1);

        state.clock.pcr_offset = 1800;
        state.calculate_bitrate().unwrap();
        assert_eq!(state.table_blocks, 0);

        state.config.table_period = 900;
        state.calculate_bitrate().unwrap();
        assert_eq!(state.table_blocks, 2);
    }
}
