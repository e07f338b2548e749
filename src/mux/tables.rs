//! PSI/SI table generation.
use crate::mux::state::{Program, State};
use crate::mux::MAX_STREAMS_PER_PROGRAM;
use crate::ts::payload::{Dit, EsInfo, Pat, Pmt, ProgramAssociation, Sdt, Service};
use crate::ts::Pid;
use crate::{ErrorKind, Result};

impl State {
    /// Rebuilds the packed stream list and renders the DIT, PAT, SDT and PMT
    /// packets from the current programs and streams.
    pub fn regenerate_tables(&mut self) -> Result<()> {
        self.packed_streams.clear();
        self.pmt_count = 0;
        for (program_id, program) in self.programs.iter().enumerate() {
            if program.is_none() {
                continue;
            }
            for stream_id in 0..MAX_STREAMS_PER_PROGRAM {
                if self.streams[program_id][stream_id].is_some() {
                    self.packed_streams.push((program_id, stream_id));
                }
            }
        }

        let dit = Dit {
            transition_flag: false,
        };
        track!(dit.write_to_packet(&mut self.dit_packet))?;

        if self.config.generate_pat_pmt {
            track!(self.generate_pat())?;
            if self.config.generate_sdt {
                track!(self.generate_sdt())?;
            }
            for program_id in 0..self.programs.len() {
                let is_av_program = self
                    .program(program_id)
                    .map_or(false, |p| !p.params.tables_program);
                if is_av_program {
                    self.pmt_count += 1;
                    if let Err(e) = self.generate_pmt(program_id) {
                        error!("Failed to generate tables: {}", e);
                        return Err(track!(e));
                    }
                }
            }
        }

        self.regenerate_tables = false;
        Ok(())
    }

    fn av_programs<'a>(&'a self) -> impl Iterator<Item = &'a Program> + 'a {
        self.programs
            .iter()
            .filter_map(|p| p.as_ref())
            .filter(|p| !p.params.tables_program)
    }

    fn generate_pat(&mut self) -> Result<()> {
        let pat = Pat {
            transport_stream_id: self.config.transport_stream_id,
            table: self
                .av_programs()
                .map(|p| ProgramAssociation {
                    program_num: p.params.program_number,
                    program_map_pid: p.params.pmt_pid,
                })
                .collect(),
        };
        let discontinuity = self.config.table_discontinuity;
        track!(pat.write_to_packet(&mut self.pat_packet, discontinuity))
    }

    fn generate_sdt(&mut self) -> Result<()> {
        let sdt = Sdt {
            transport_stream_id: self.config.transport_stream_id,
            original_network_id: 0,
            services: self
                .av_programs()
                .map(|p| Service {
                    service_id: p.params.program_number,
                    free_ca_mode: p.params.streams_may_be_scrambled,
                    provider_name: p.params.provider_name.clone(),
                    service_name: p.params.service_name.clone(),
                })
                .collect(),
        };
        let discontinuity = self.config.table_discontinuity;
        track!(sdt.write_to_packet(&mut self.sdt_packet, discontinuity))
    }

    fn generate_pmt(&mut self, program_id: usize) -> Result<()> {
        let pcr_pid = track!(self.pcr_pid_of(program_id))?;
        let streams = self.streams[program_id].iter().filter_map(|s| s.as_ref());
        let es_info = streams
            .map(|s| EsInfo {
                stream_type: s.params.stream_type,
                elementary_pid: s.params.stream_pid,
                descriptors: s.params.descriptor.clone(),
            })
            .collect();

        let discontinuity = self.config.table_discontinuity;
        let program = track_assert_some!(
            self.programs[program_id].as_mut(),
            ErrorKind::UnrecognisedId
        );
        let pmt = Pmt {
            program_num: program.params.program_number,
            pcr_pid,
            program_info: program.params.descriptor.clone(),
            es_info,
        };
        track!(pmt.write_to_packet(&mut program.pmt_packet, discontinuity))
    }

    /// PID carrying the PCR of a program: the dedicated PCR stream when one
    /// is generated, otherwise the first stream incorporating PCR packets.
    pub fn pcr_pid_of(&self, program_id: usize) -> Result<Pid> {
        if self.config.generate_pcr_stream {
            return Ok(self.config.pcr_pid);
        }
        let pid = self.streams[program_id]
            .iter()
            .filter_map(|s| s.as_ref())
            .find(|s| s.params.incorporate_pcr_packet)
            .map(|s| s.params.stream_pid);
        let pid = track_assert_some!(
            pid,
            ErrorKind::NoPcrChannelForProgram,
            "No PCR available for program {}",
            program_id
        );
        Ok(pid)
    }
}
