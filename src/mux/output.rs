//! Rendering of a prepared pass.
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::mux::multiplex::{OutputCode, TableCode};
use crate::mux::state::{Schedule, State};
use crate::mux::status::OutputStatus;
use crate::pes;
use crate::time::{pcr_limit, ClockReference};
use crate::ts::payload::{Dit, Null, PcrPacket};
use crate::ts::{AdaptationField, AdaptationFieldControl, ContinuityCounter, TransportScramblingControl,
                TsHeader, TsPacket};
use crate::{ErrorKind, Result};

impl State {
    /// Writes the packets decided by the latest `prepare_output` and
    /// releases the buffers sent completely.
    pub fn perform_output<W: Write>(&mut self, mut writer: W, status: &mut OutputStatus) -> Result<()> {
        let schedule = track_assert_some!(
            self.schedule.take(),
            ErrorKind::InvalidParameter,
            "No prepared output to perform"
        );
        for (packet_number, &code) in schedule.codes.iter().enumerate() {
            track!(self.output_one_packet(&mut writer, &schedule, packet_number, code, status))?;
        }

        for i in 0..self.packed_streams.len() {
            let (program_id, stream_id) = self.packed_streams[i];
            let stream = match self.streams[program_id][stream_id].as_mut() {
                Some(stream) => stream,
                None => continue,
            };
            if let Some(head) = stream.buffers.front() {
                let mut real_data_packets = head.progress.number_of_transport_packets;
                if stream.params.incorporate_pcr_packet && real_data_packets != 0 {
                    real_data_packets -= 1;
                }
                if real_data_packets != 0 && !head.repeating {
                    status.non_output_data_remains = true;
                }
            }
            if !stream.params.stream_pes {
                stream.bit_buffer_level = 0;
            }
            status.decoder_bit_buffer_levels[program_id][stream_id] = stream.bit_buffer_level;
        }
        Ok(())
    }

    // 27 MHz clock at the start of a packet of the pass.
    fn packet_clock(&self, schedule: &Schedule, packet_number: usize) -> ClockReference {
        let base = pcr_limit(schedule.pcr + self.clock.shift) * 300;
        let elapsed = if schedule.bitrate == 0 {
            0
        } else {
            self.config.bits_per_packet() * packet_number as u64 * ClockReference::RESOLUTION
                / schedule.bitrate
        };
        ClockReference::new(base + elapsed)
    }

    fn output_one_packet<W: Write>(
        &mut self,
        mut writer: W,
        schedule: &Schedule,
        packet_number: usize,
        code: OutputCode,
        status: &mut OutputStatus,
    ) -> Result<()> {
        let clock = self.packet_clock(schedule, packet_number);
        if self.config.time_stamped_packets {
            track_io!(writer.write_u32::<BigEndian>(clock.as_u64() as u32))?;
        }

        match code {
            OutputCode::Data {
                program_id,
                stream_id,
            } => track!(self.output_data_packet(writer, program_id, stream_id, clock, status)),
            OutputCode::Pcr => {
                let packet = PcrPacket {
                    pid: self.config.pcr_pid,
                    continuity_counter: ContinuityCounter::new(),
                    discontinuity_indicator: self.config.pcr_discontinuity,
                    pcr: clock,
                };
                track!(packet.write_to(writer))?;
                self.config.pcr_discontinuity = false;
                Ok(())
            }
            OutputCode::PcrOnStream {
                program_id,
                stream_id,
            } => {
                let stream = match self.stream(program_id, stream_id) {
                    Some(stream) => stream,
                    None => {
                        error!("PCR scheduled on removed stream {}:{}", program_id, stream_id);
                        return track!(Null::write_to(writer));
                    }
                };
                let packet = PcrPacket {
                    pid: stream.params.stream_pid,
                    continuity_counter: stream.continuity_counter,
                    discontinuity_indicator: false,
                    pcr: clock,
                };
                track!(packet.write_to(writer))?;
                self.config.pcr_discontinuity = false;
                Ok(())
            }
            OutputCode::Table(table) => track!(self.output_table_packet(writer, table)),
            OutputCode::Null => track!(Null::write_to(writer)),
        }
    }

    fn output_table_packet<W: Write>(&mut self, writer: W, table: TableCode) -> Result<()> {
        let packet = match table {
            TableCode::Pat => &mut self.pat_packet,
            TableCode::Sdt => &mut self.sdt_packet,
            TableCode::Pmt { program_id } => match self.programs[program_id].as_mut() {
                Some(program) => &mut program.pmt_packet,
                None => {
                    error!("PMT scheduled for removed program {}", program_id);
                    return track!(Null::write_to(writer));
                }
            },
            TableCode::Dit { transition_flag } => {
                Dit { transition_flag }.patch_packet(&mut self.dit_packet);
                &mut self.dit_packet
            }
        };
        track!(packet.emit(writer))?;

        if let TableCode::Dit { .. } = table {
            if self.config.table_discontinuity {
                self.config.table_discontinuity = false;
                self.regenerate_tables = true;
            }
        }
        Ok(())
    }

    fn output_data_packet<W: Write>(
        &mut self,
        mut writer: W,
        program_id: usize,
        stream_id: usize,
        clock: ClockReference,
        status: &mut OutputStatus,
    ) -> Result<()> {
        let shift = self.clock.shift;
        let stream = match self.streams[program_id][stream_id].as_mut() {
            Some(stream) => stream,
            None => {
                error!("Data scheduled on removed stream {}:{}", program_id, stream_id);
                return track!(Null::write_to(writer));
            }
        };
        let is_pes = stream.params.stream_pes;
        let buffer = match stream.buffers.front_mut() {
            Some(buffer) => buffer,
            None => {
                error!("No buffer queued on stream {}:{}", program_id, stream_id);
                return track!(Null::write_to(writer));
            }
        };

        let first = buffer.progress.remaining_size == 0;
        let mut available = TsPacket::MAX_PAYLOAD_SIZE;
        let mut adaptation_size = 0;
        let mut field = AdaptationField::default();
        let mut pcr_flag = false;

        if first {
            buffer.progress.remaining_size = buffer.size();
            buffer.progress.page = 0;
            buffer.progress.page_offset = 0;

            if buffer.discontinuity {
                adaptation_size = 2;
                available -= 2;
                field.discontinuity_indicator = true;
            }
            if !is_pes {
                available -= 1; // pointer_field
            } else if shift != 0 {
                if let Some(page) = buffer.pages.first_mut() {
                    if let Err(e) = pes::shift_timestamps(&mut page.data, shift) {
                        warn!(
                            "Cannot shift the PES timestamps of stream {}:{}: {}",
                            program_id, stream_id, e
                        );
                    }
                }
            }
        }

        if buffer.request_rap_bit && buffer.progress.outstanding_rap_request {
            if adaptation_size == 0 {
                adaptation_size = 2;
                available -= 2;
            }
            if stream.params.incorporate_pcr_packet {
                adaptation_size += ClockReference::PCR_SIZE;
                available -= ClockReference::PCR_SIZE;
                pcr_flag = true;
            }
            field.random_access_indicator = true;
            buffer.progress.outstanding_rap_request = false;
            debug!("Generating RAP bit on stream {}:{}", program_id, stream_id);
        }

        let last = buffer.progress.remaining_size <= available;
        let pad = if last {
            available - buffer.progress.remaining_size
        } else {
            0
        };
        let has_adaptation_field = adaptation_size != 0 || pad != 0;

        let header = TsHeader::new(
            first,
            stream.params.stream_pid,
            TransportScramblingControl::new(buffer.scrambled, buffer.odd_parity),
            track!(AdaptationFieldControl::new(has_adaptation_field, true))?,
            stream.continuity_counter.increment(),
        );
        track!(header.write_to(&mut writer))?;

        if has_adaptation_field {
            let mut size = adaptation_size + pad;
            if size > TsPacket::MAX_PAYLOAD_SIZE {
                error!(
                    "Adaptation field too large on stream {}:{}: {}",
                    program_id, stream_id, size
                );
                size = TsPacket::MAX_PAYLOAD_SIZE;
            }
            if first && pcr_flag {
                field.pcr = Some(clock);
            }
            if field.discontinuity_indicator || field.random_access_indicator || field.pcr.is_some() {
                track!(field.write_to(&mut writer, size))?;
            } else {
                track!(AdaptationField::write_stuffing(&mut writer, size))?;
            }
            available -= pad;
        }

        if first && !is_pes {
            track_io!(writer.write_u8(0))?;
        }

        let progress = &mut buffer.progress;
        while available != 0 {
            let page = track_assert_some!(
                buffer.pages.get(progress.page),
                ErrorKind::Error,
                "Ran out of pages on stream {}:{} ({} bytes left)",
                program_id,
                stream_id,
                available
            );
            let data = &page.data[progress.page_offset..];
            let n = available.min(data.len());
            track_io!(writer.write_all(&data[..n]))?;

            available -= n;
            progress.remaining_size -= n;
            progress.page_offset += n;
            if progress.page_offset == page.data.len() && progress.remaining_size != 0 {
                progress.page += 1;
                progress.page_offset = 0;
            }
        }

        if last {
            if buffer.repeating {
                buffer.progress.remaining_size = 0;
            } else if let Some(done) = stream.buffers.pop_front() {
                status.completed_buffers.push(done.user_data);
                self.release_buffer(false, done);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mux::config::{MultiplexorConfig, ProgramParameters};
    use crate::mux::state::test::{buffer, pes_stream, state, Released};
    use crate::ts::Pid;

    fn data(stream_id: usize) -> OutputCode {
        OutputCode::Data {
            program_id: 0,
            stream_id,
        }
    }

    fn state_with_stream(config: MultiplexorConfig, pes: bool, pcr: bool) -> (State, Released) {
        let (mut state, released) = state(config);
        state
            .add_program(ProgramParameters {
                tables_program: true,
                ..ProgramParameters::default()
            })
            .unwrap();
        let mut params = pes_stream(0, 0, 0x100);
        params.stream_pes = pes;
        params.incorporate_pcr_packet = pcr;
        state.add_stream(params).unwrap();
        state.regenerate_tables().unwrap();
        (state, released)
    }

    fn perform(state: &mut State, codes: Vec<OutputCode>, pcr: u64) -> (Vec<u8>, OutputStatus) {
        state.schedule = Some(Schedule {
            codes,
            pcr,
            bitrate: 2_000_000,
        });
        let mut out = Vec::new();
        let mut status = OutputStatus::default();
        state.perform_output(&mut out, &mut status).unwrap();
        (out, status)
    }

    #[test]
    fn section_split_over_two_packets() {
        let (mut state, released) = state_with_stream(MultiplexorConfig::default(), false, false);
        let mut b = buffer(&state, (0, 0), 200, 5);
        b.pages[0].data = (0..200).map(|i| i as u8).collect();
        state.supply_buffer(b).unwrap();

        let (out, status) = perform(&mut state, vec![data(0), data(0)], 0);
        assert_eq!(out.len(), 2 * 188);

        assert_eq!(&out[..5], &[0x47, 0x41, 0x00, 0x11, 0x00]);
        assert_eq!(out[5], 0);
        assert_eq!(out[187], 182);

        let second = &out[188..];
        assert_eq!(&second[..4], &[0x47, 0x01, 0x00, 0x32]);
        assert_eq!(&second[4..6], &[166, 0x00]);
        assert!(second[6..171].iter().all(|&b| b == 0xFF));
        assert_eq!(second[171], 183);
        assert_eq!(second[187], 199);

        assert_eq!(status.completed_buffers, vec![5]);
        assert_eq!(*released.lock().unwrap(), vec![(false, 5)]);
        assert!(state.stream(0, 0).unwrap().buffers.is_empty());
        assert!(!status.non_output_data_remains);
    }

    #[test]
    fn random_access_point_with_pcr() {
        let (mut state, _) = state_with_stream(MultiplexorConfig::default(), true, true);
        let mut b = buffer(&state, (0, 0), 100, 0);
        b.discontinuity = true;
        b.request_rap_bit = true;
        state.supply_buffer(b).unwrap();
        assert_eq!(state.stream(0, 0).unwrap().buffers[0].progress.number_of_transport_packets, 1);

        let (out, _) = perform(&mut state, vec![data(0)], 1000);
        assert_eq!(out.len(), 188);
        assert_eq!(&out[..4], &[0x47, 0x41, 0x00, 0x31]);
        assert_eq!(out[4], 83);
        assert_eq!(out[5], 0xD0);
        assert_eq!(&out[6..12], &ClockReference::new(300_000).to_pcr_bytes()[..]);
        assert!(out[12..88].iter().all(|&b| b == 0xFF));
        assert!(out[88..].iter().all(|&b| b == 0));
    }

    #[test]
    fn payload_spans_scatter_pages() {
        let (mut state, _) = state_with_stream(MultiplexorConfig::default(), true, false);
        let mut b = state.pool.get_buffer_structure(2).unwrap();
        b.pages[0].data = vec![1; 100];
        b.pages[1].data = vec![2; 100];
        state.supply_buffer(b).unwrap();

        let (out, _) = perform(&mut state, vec![data(0), OutputCode::Null], 0);
        assert!(out[4..104].iter().all(|&b| b == 1));
        assert!(out[104..188].iter().all(|&b| b == 2));
        assert_eq!(&out[188..192], &[0x47, 0x1F, 0xFF, 0x10]);

        let stream = state.stream(0, 0).unwrap();
        assert_eq!(stream.buffers[0].progress.remaining_size, 16);
        assert_eq!(stream.buffers[0].progress.page, 1);
        assert_eq!(stream.buffers[0].progress.page_offset, 84);
    }

    #[test]
    fn time_stamped_packets() {
        let config = MultiplexorConfig {
            time_stamped_packets: true,
            generate_pcr_stream: true,
            pcr_pid: Pid::from(0x1F),
            pcr_discontinuity: true,
            ..MultiplexorConfig::default()
        };
        let (mut state, _) = state(config);
        let (out, _) = perform(&mut state, vec![OutputCode::Pcr, OutputCode::Null], 90_000);
        assert_eq!(out.len(), 2 * 192);

        let clock = 90_000 * 300u64;
        assert_eq!(&out[..4], &(clock as u32).to_be_bytes());
        assert_eq!(&out[4..8], &[0x47, 0x00, 0x1F, 0x20]);
        assert_eq!(out[9], 0x90);
        assert!(!state.config.pcr_discontinuity);

        let clock = clock + 1536 * 27_000_000 / 2_000_000;
        assert_eq!(&out[192..196], &(clock as u32).to_be_bytes());
    }

    #[test]
    fn dit_ends_table_discontinuity() {
        let config = MultiplexorConfig {
            table_discontinuity: true,
            ..MultiplexorConfig::default()
        };
        let (mut state, _) = state(config);
        state.regenerate_tables().unwrap();

        let dit = OutputCode::Table(TableCode::Dit {
            transition_flag: true,
        });
        let (out, _) = perform(&mut state, vec![OutputCode::Table(TableCode::Pat), dit], 0);
        assert_eq!(&out[..4], &[0x47, 0x40, 0x00, 0x31]);
        assert_eq!(&out[188..192], &[0x47, 0x40, 0x1E, 0x11]);
        assert_eq!(out[188 + 8], 0xFF);
        assert!(!state.config.table_discontinuity);
        assert!(state.regenerate_tables);
    }

    #[test]
    fn nothing_to_perform() {
        let (mut state, _) = state(MultiplexorConfig::default());
        let mut status = OutputStatus::default();
        assert!(state.perform_output(Vec::new(), &mut status).is_err());
    }
}
