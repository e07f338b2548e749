//! Slot by slot scheduling of one pass.
//!
//! Every output slot of the pass gets a virtual PCR, evenly spread over the
//! PCR period. At each slot the stream whose next packet has the earliest
//! virtual DTS wins, with streams already above their desired bit-buffer
//! level only considered when nothing else is eligible.
use std::mem;

use crate::mux::buffer::Buffer;
use crate::mux::config::OutputParameters;
use crate::mux::state::{BitBufferExpiry, Schedule, State};
use crate::mux::status::{IndexFlags, IndexRecord, OutputStatus};
use crate::mux::{desired_bit_buffer_level, PAYLOAD_BITS};
use crate::time::{in_time_period, pcr_limit};
use crate::ts::TsPacket;
use crate::{ErrorKind, Result};

/// Decision for one output packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputCode {
    /// Dedicated PCR packet on the configured PCR PID.
    Pcr,

    /// Adaptation-field-only PCR packet on a stream's PID.
    PcrOnStream { program_id: usize, stream_id: usize },

    Table(TableCode),

    /// Next packet of the stream's head buffer.
    Data { program_id: usize, stream_id: usize },

    Null,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableCode {
    Pat,
    Sdt,
    Pmt { program_id: usize },
    Dit { transition_flag: bool },
}

/// Virtual DTS values are rotated so that the current virtual PCR sits at
/// `0xffff_ffff`, which makes plain comparisons valid across wraps.
const ROTATION_BASE: u64 = 0xffff_ffff;

/// Added to the virtual DTS of streams above their desired level.
const ABOVE_DESIRED_LEVEL: u64 = 0x4_0000_0000;

const NO_CANDIDATE: u64 = 0x8_0000_0000;

impl State {
    /// Decides the packets of the coming PCR period.
    ///
    /// On success, and on `ErrorKind::DeliveryFailure`, the pass is kept for
    /// `perform_output` and the clock advances by one PCR period.
    pub fn prepare_output(&mut self, params: &OutputParameters, status: &mut OutputStatus) -> Result<()> {
        track_assert!(
            self.schedule.is_none(),
            ErrorKind::InvalidParameter,
            "The previous output has not been performed"
        );
        *status = OutputStatus::default();
        self.underflow = None;
        self.flushing = params.flush;
        self.index_records.clear();

        if self.regenerate_tables {
            track!(self.regenerate_tables())?;
        }
        if let Err(e) = self.plan_pass() {
            if *e.kind() == ErrorKind::InputUnderflow {
                status.input_underflow = self.underflow;
            }
            return Err(track!(e));
        }

        let packet_size = if self.config.time_stamped_packets {
            TsPacket::TIMESTAMPED_SIZE
        } else {
            TsPacket::SIZE
        };
        let bytes_needed = self.output_packets * packet_size;
        if bytes_needed > params.output_size {
            error!(
                "Output buffer not large enough ({} > {})",
                bytes_needed, params.output_size
            );
            status.overflow_output_size = Some(bytes_needed);
            track_panic!(
                ErrorKind::OutputOverflow,
                "{} bytes needed, {} available",
                bytes_needed,
                params.output_size
            );
        }

        let mut codes = Vec::with_capacity(self.output_packets);
        if self.config.generate_pcr_stream {
            codes.push(OutputCode::Pcr);
        }
        for &(program_id, stream_id) in &self.packed_streams {
            let on_stream = self
                .stream(program_id, stream_id)
                .map_or(false, |s| s.params.incorporate_pcr_packet);
            if on_stream {
                codes.push(OutputCode::PcrOnStream {
                    program_id,
                    stream_id,
                });
            }
        }
        codes.truncate(self.output_packets);
        let late = self.perform_multiplex(&mut codes);

        let pcr = self.clock.current_pcr();
        status.pcr = pcr;
        status.offset_from_start = self.clock.pcr_offset;
        status.output_duration = self.config.pcr_period;
        status.bitrate = self.bitrate;
        status.output_packets = codes.len();
        status.index = mem::replace(&mut self.index_records, Vec::new());

        self.clock.pcr_offset += self.config.pcr_period;
        self.total_packet_count += codes.len() as u64;
        self.schedule = Some(Schedule {
            codes,
            pcr,
            bitrate: self.bitrate,
        });

        track_assert!(
            !late,
            ErrorKind::DeliveryFailure,
            "Some buffers were multiplexed after their decode time"
        );
        Ok(())
    }

    fn plan_pass(&mut self) -> Result<()> {
        if !self.clock.initialized {
            if let Err(e) = self.generate_initial_pcr() {
                error!("Failed to generate the initial PCR: {}", e);
                return Err(track!(e));
            }
        }
        track!(self.calculate_bitrate())
    }

    /// Fills `codes` up to `output_packets` entries.
    ///
    /// Returns `true` if a PES buffer could not be completed before its
    /// decode deadline.
    pub fn perform_multiplex(&mut self, codes: &mut Vec<OutputCode>) -> bool {
        for &(program_id, stream_id) in &self.packed_streams {
            if let Some(stream) = self.streams[program_id][stream_id].as_mut() {
                stream.multiplex_cursor = 0;
            }
        }

        let output_packets = self.output_packets;
        let pcr_period = self.config.pcr_period;
        let base_pcr = self.clock.current_pcr();
        let pcr_packet_duration = (pcr_period + output_packets as u64 - 1) / (output_packets.max(1) as u64);
        let expiry_base = pcr_limit(base_pcr.wrapping_sub(1 << 32));
        let table_interval = if self.table_blocks != 0 {
            (output_packets / self.table_blocks).max(1)
        } else {
            0
        };

        let first_slot = codes.len();
        let mut late = false;
        while codes.len() < output_packets {
            let slot = codes.len();
            if table_interval != 0 && (slot - first_slot) % table_interval == 0 {
                self.schedule_tables(codes);
                continue;
            }

            let vpcr = pcr_limit(base_pcr + slot as u64 * pcr_period / output_packets as u64);
            let rotate = ROTATION_BASE.wrapping_sub(vpcr);
            let (program_id, stream_id) = match self.select_stream(vpcr, rotate, expiry_base) {
                Some(selected) => selected,
                None => {
                    codes.push(OutputCode::Null);
                    continue;
                }
            };

            let missed = self.schedule_packet(program_id, stream_id, rotate, pcr_packet_duration, codes);
            if let Some((dts, ticks_late)) = missed {
                if !late {
                    error!(
                        "Failed to multiplex buffer of stream {}:{} in time for DTS {:#011x} ({} ticks late)",
                        program_id, stream_id, dts, ticks_late
                    );
                    debug!(
                        "slot={}, vpcr={:#011x}, rotate={:#011x}, pcr_packet_duration={}",
                        slot, vpcr, rotate, pcr_packet_duration
                    );
                    late = true;
                }
            }
        }
        late
    }

    fn schedule_tables(&mut self, codes: &mut Vec<OutputCode>) {
        let mut block = vec![(TableCode::Pat, IndexFlags::PAT)];
        if self.config.generate_sdt {
            block.push((TableCode::Sdt, IndexFlags::SDT));
        }
        for (program_id, program) in self.programs.iter().enumerate() {
            if program.as_ref().map_or(false, |p| !p.params.tables_program) {
                block.push((TableCode::Pmt { program_id }, IndexFlags::PMT));
            }
        }

        let room = self.output_packets - codes.len();
        for (code, flags) in block.into_iter().take(room) {
            if self.config.generate_index {
                self.index_records.push(IndexRecord {
                    packet_offset: self.total_packet_count + codes.len() as u64,
                    program_id: None,
                    stream_id: None,
                    pts: 0,
                    flags,
                });
            }
            codes.push(OutputCode::Table(code));
        }
    }

    // Picks the stream with the lowest virtual DTS, if any may send.
    fn select_stream(&mut self, vpcr: u64, rotate: u64, expiry_base: u64) -> Option<(usize, usize)> {
        let mut min_vdts = NO_CANDIDATE;
        let mut selected = None;
        for &(program_id, stream_id) in &self.packed_streams {
            let stream = match self.streams[program_id][stream_id].as_mut() {
                Some(stream) => stream,
                None => continue,
            };

            let vdts = if stream.params.stream_pes {
                // At most one expiry per slot, even without queued data
                if let Some(expiry) = stream.bit_buffer_expiry.peek().cloned() {
                    if in_time_period(expiry.dts, expiry_base, vpcr) {
                        let _ = stream.bit_buffer_expiry.extract();
                        stream.bit_buffer_level -= expiry.bits;
                    }
                }

                let new_level = stream.bit_buffer_level + PAYLOAD_BITS;
                let buffer = match stream.buffers.get(stream.multiplex_cursor) {
                    Some(b) if b.progress.number_of_transport_packets != 0 => b,
                    _ => continue,
                };
                if new_level > stream.decoder_bit_buffer_size() {
                    continue;
                }
                if stream.bit_buffer_expiry.len() >= stream.bit_buffer_expiry.capacity() - 1 {
                    error!(
                        "All expiry records used on stream {}:{}",
                        program_id, stream_id
                    );
                    continue;
                }

                let mut vdts = virtual_dts(buffer, rotate);
                if new_level > desired_bit_buffer_level(stream.params.decoder_bit_buffer_size) {
                    vdts |= ABOVE_DESIRED_LEVEL;
                }
                vdts
            } else {
                let buffer = match stream.buffers.get(stream.multiplex_cursor) {
                    Some(b) if b.progress.number_of_transport_packets != 0 => b,
                    _ => continue,
                };
                let vdts = virtual_dts(buffer, rotate);

                // Sections are never sent ahead of their DTS
                if buffer.progress.current_transport_packet == 0 && vdts > ROTATION_BASE {
                    continue;
                }
                vdts
            };

            if vdts < min_vdts {
                min_vdts = vdts;
                selected = Some((program_id, stream_id));
            }
        }
        selected
    }

    // Schedules the next packet of the selected stream (or the DIT it asked
    // for). Returns the DTS and lateness of a PES buffer completed too late.
    fn schedule_packet(
        &mut self,
        program_id: usize,
        stream_id: usize,
        rotate: u64,
        pcr_packet_duration: u64,
        codes: &mut Vec<OutputCode>,
    ) -> Option<(u64, u64)> {
        let generate_index = self.config.generate_index;
        let shift = self.clock.shift;
        let packet_offset = self.total_packet_count + codes.len() as u64;

        let stream = self.streams[program_id][stream_id].as_mut()?;
        let pes = stream.params.stream_pes;
        let buffer = stream.buffers.get_mut(stream.multiplex_cursor)?;

        let mut index = |buffer: &mut Buffer, mask: IndexFlags| {
            if !generate_index {
                return None;
            }
            take_index_flags(buffer, mask).map(|flags| IndexRecord {
                packet_offset,
                program_id: Some(program_id),
                stream_id: Some(stream_id),
                pts: pcr_limit(buffer.dts + shift),
                flags,
            })
        };

        if buffer.progress.outstanding_dit_request {
            let record = index(buffer, IndexFlags::DIT);
            self.index_records.extend(record);
            codes.push(OutputCode::Table(TableCode::Dit {
                transition_flag: buffer.dit_transition_flag,
            }));
            buffer.progress.outstanding_dit_request = false;
            return None;
        }

        if buffer.progress.current_transport_packet == 0 {
            let record = index(buffer, !IndexFlags::TABLES);
            self.index_records.extend(record);
        }
        codes.push(OutputCode::Data {
            program_id,
            stream_id,
        });
        buffer.progress.current_transport_packet += 1;
        stream.bit_buffer_level += PAYLOAD_BITS;

        let packets = buffer.progress.number_of_transport_packets;
        if buffer.progress.current_transport_packet != packets {
            return None;
        }

        if pes {
            let deadline = pcr_limit(
                rotate
                    .wrapping_add(buffer.dts)
                    .wrapping_sub(pcr_packet_duration),
            );
            let missed = if deadline < 1 << 32 {
                Some((buffer.dts, (1 << 32) - deadline))
            } else {
                None
            };

            let expiry = BitBufferExpiry {
                dts: buffer.dts,
                bits: PAYLOAD_BITS * packets as i64,
            };
            if stream.bit_buffer_expiry.insert(expiry).is_err() {
                error!(
                    "All expiry records used on stream {}:{}",
                    program_id, stream_id
                );
            }
            stream.multiplex_cursor += 1;
            missed
        } else {
            if buffer.repeating {
                buffer.progress.current_transport_packet = 0;
                buffer.dts = pcr_limit(buffer.dts + buffer.repeat_interval);
                buffer.progress.outstanding_dit_request = buffer.request_dit_insertion;
            } else {
                stream.multiplex_cursor += 1;
            }
            None
        }
    }
}

fn virtual_dts(buffer: &Buffer, rotate: u64) -> u64 {
    let progress = &buffer.progress;
    let elapsed = progress.current_transport_packet as u64 * buffer.dts_duration
        / progress.number_of_transport_packets as u64;
    pcr_limit(rotate.wrapping_add(buffer.dts).wrapping_add(elapsed))
}

// Takes the flags of the buffer's index identifier selected by `mask`, so
// that each is reported once.
fn take_index_flags(buffer: &mut Buffer, mask: IndexFlags) -> Option<IndexFlags> {
    let flags = IndexFlags::from_identifier(&buffer.index_identifier) & mask;
    if flags.is_empty() {
        return None;
    }
    for (i, b) in buffer.index_identifier.iter_mut().take(4).enumerate() {
        *b &= !((flags.bits() >> (8 * i)) as u8);
    }
    Some(flags)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mux::config::{MultiplexorConfig, ProgramParameters};
    use crate::mux::state::test::{buffer, pes_stream, state};
    use crate::mux::state::State;

    const INITIAL_PCR: u64 = 1_000_000;

    fn data(stream_id: usize) -> OutputCode {
        OutputCode::Data {
            program_id: 0,
            stream_id,
        }
    }

    fn prepared_state(config: MultiplexorConfig, tables_program: bool) -> State {
        let (mut state, _) = state(config);
        state
            .add_program(ProgramParameters {
                tables_program,
                ..ProgramParameters::default()
            })
            .unwrap();
        state.clock.initialized = true;
        state.clock.initial_pcr = INITIAL_PCR;
        state.flushing = true;
        state
    }

    fn config() -> MultiplexorConfig {
        MultiplexorConfig {
            pcr_period: 1800,
            bitrate: 2_000_000,
            table_period: 1800,
            generate_index: true,
            ..MultiplexorConfig::default()
        }
    }

    fn run(state: &mut State) -> (Vec<OutputCode>, bool) {
        state.regenerate_tables().unwrap();
        state.calculate_bitrate().unwrap();
        let mut codes = Vec::new();
        let late = state.perform_multiplex(&mut codes);
        (codes, late)
    }

    #[test]
    fn tables_then_data() {
        let mut state = prepared_state(config(), false);
        let mut video = pes_stream(0, 0, 0x100);
        video.incorporate_pcr_packet = true;
        state.add_stream(video).unwrap();
        let mut b = buffer(&state, (0, 0), 1000, INITIAL_PCR + 90_000);
        b.index_identifier = vec![0x10, 0, 0, 0];
        state.supply_buffer(b).unwrap();

        let (codes, late) = run(&mut state);
        assert!(!late);
        assert_eq!(
            codes,
            vec![
                OutputCode::Table(TableCode::Pat),
                OutputCode::Table(TableCode::Pmt { program_id: 0 }),
                data(0),
                data(0),
                data(0),
                data(0),
                data(0),
                data(0),
                OutputCode::Null,
            ]
        );

        let stream = state.stream(0, 0).unwrap();
        assert_eq!(stream.bit_buffer_level, 6 * PAYLOAD_BITS);
        assert_eq!(stream.multiplex_cursor, 1);
        assert_eq!(stream.bit_buffer_expiry.len(), 1);

        let flags: Vec<_> = state.index_records.iter().map(|r| r.flags).collect();
        assert_eq!(
            flags,
            vec![IndexFlags::PAT, IndexFlags::PMT, IndexFlags::from_bits(0x10)]
        );
        assert_eq!(state.index_records[2].packet_offset, 2);
        assert_eq!(state.index_records[2].pts, INITIAL_PCR + 90_000);
    }

    #[test]
    fn late_buffer_is_reported() {
        let mut state = prepared_state(config(), false);
        let mut video = pes_stream(0, 0, 0x100);
        video.incorporate_pcr_packet = true;
        state.add_stream(video).unwrap();
        let b = buffer(&state, (0, 0), 1000, INITIAL_PCR + 100);
        state.supply_buffer(b).unwrap();

        let (_, late) = run(&mut state);
        assert!(late);
    }

    #[test]
    fn sections_wait_for_their_dts() {
        let config = MultiplexorConfig {
            generate_pat_pmt: false,
            fixed_bitrate: true,
            ..config()
        };
        let mut state = prepared_state(config, true);
        let mut params = pes_stream(0, 0, 0x100);
        params.stream_pes = false;
        state.add_stream(params).unwrap();
        let b = buffer(&state, (0, 0), 100, INITIAL_PCR + 900);
        state.supply_buffer(b).unwrap();

        let (codes, _) = run(&mut state);
        assert_eq!(codes.len(), 26);
        let slots: Vec<_> = (0..codes.len()).filter(|&i| codes[i] == data(0)).collect();
        assert_eq!(slots, vec![13]);
    }

    #[test]
    fn section_after_pause_is_sent() {
        let config = MultiplexorConfig {
            generate_pat_pmt: false,
            fixed_bitrate: true,
            ..config()
        };
        let mut state = prepared_state(config, true);
        let mut params = pes_stream(0, 0, 0x100);
        params.stream_pes = false;
        state.add_stream(params).unwrap();
        let b = buffer(&state, (0, 0), 0, INITIAL_PCR);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 0), 100, INITIAL_PCR + 900);
        state.supply_buffer(b).unwrap();

        let (codes, _) = run(&mut state);
        let slots: Vec<_> = (0..codes.len()).filter(|&i| codes[i] == data(0)).collect();
        assert_eq!(slots, vec![13]);
    }

    #[test]
    fn repeating_section_with_dit() {
        let config = MultiplexorConfig {
            generate_pat_pmt: false,
            fixed_bitrate: true,
            ..config()
        };
        let mut state = prepared_state(config, true);
        let mut params = pes_stream(0, 0, 0x100);
        params.stream_pes = false;
        state.add_stream(params).unwrap();
        let mut b = buffer(&state, (0, 0), 100, 0);
        b.repeating = true;
        b.repeat_interval = 900;
        b.request_dit_insertion = true;
        b.dit_transition_flag = true;
        state.supply_buffer(b).unwrap();
        assert_eq!(state.stream(0, 0).unwrap().buffers[0].dts, INITIAL_PCR);

        let (codes, _) = run(&mut state);
        let dit = OutputCode::Table(TableCode::Dit {
            transition_flag: true,
        });
        assert_eq!(&codes[..2], &[dit, data(0)]);
        assert_eq!(&codes[13..15], &[dit, data(0)]);
        assert_eq!(codes.iter().filter(|&&c| c == data(0)).count(), 2);
        assert_eq!(
            state.stream(0, 0).unwrap().buffers[0].dts,
            INITIAL_PCR + 1800
        );
    }

    #[test]
    fn lowest_virtual_dts_wins() {
        let config = MultiplexorConfig {
            generate_pat_pmt: false,
            ..config()
        };
        let mut state = prepared_state(config, true);
        state.add_stream(pes_stream(0, 0, 0x100)).unwrap();
        state.add_stream(pes_stream(0, 1, 0x101)).unwrap();
        let b = buffer(&state, (0, 0), 184, INITIAL_PCR + 20_000);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 1), 184, INITIAL_PCR + 10_000);
        state.supply_buffer(b).unwrap();

        let (codes, _) = run(&mut state);
        assert_eq!(codes, vec![data(1), data(0)]);
    }

    #[test]
    fn ordering_survives_timestamp_wrap() {
        let config = MultiplexorConfig {
            generate_pat_pmt: false,
            ..config()
        };
        let mut state = prepared_state(config, true);
        state.clock.initial_pcr = (1 << 33) - 900;
        state.add_stream(pes_stream(0, 0, 0x100)).unwrap();
        state.add_stream(pes_stream(0, 1, 0x101)).unwrap();
        state.add_stream(pes_stream(0, 2, 0x102)).unwrap();
        let b = buffer(&state, (0, 0), 184, 200);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 1), 184, (1 << 33) - 100);
        state.supply_buffer(b).unwrap();
        let b = buffer(&state, (0, 2), 184, 5_000);
        state.supply_buffer(b).unwrap();

        let (codes, late) = run(&mut state);
        assert!(!late);
        assert_eq!(codes, vec![data(1), data(0), data(2)]);
    }

    #[test]
    fn index_flags_are_reported_once() {
        let (state, _) = state(config());
        let mut b = buffer(&state, (0, 0), 10, 0);
        b.index_identifier = vec![0x1F, 0x01, 0x00, 0x80, 0x55];
        assert_eq!(
            take_index_flags(&mut b, !IndexFlags::TABLES),
            Some(IndexFlags::from_bits(0x8000_0110))
        );
        assert_eq!(b.index_identifier, vec![0x0F, 0x00, 0x00, 0x00, 0x55]);
        assert_eq!(take_index_flags(&mut b, !IndexFlags::TABLES), None);
        assert_eq!(take_index_flags(&mut b, IndexFlags::DIT), Some(IndexFlags::DIT));
    }
}
