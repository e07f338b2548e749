use crate::es::StreamType;
use crate::mux::{MAX_BUFFERS, MAX_DESCRIPTOR_SIZE, MAX_INDEX_IDENTIFIER_SIZE, MAX_NAME_SIZE,
                 MAX_PROGRAMS, MAX_SCATTER_PAGES, MAX_STREAMS_PER_PROGRAM};
use crate::ts::Pid;
use crate::{ErrorKind, Result};

/// Sizing limits of the multiplexor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub max_name_size: usize,
    pub max_descriptor_size: usize,
    pub max_programs: usize,
    pub max_streams_per_program: usize,
    pub max_buffers: usize,
    pub max_scatter_pages: usize,
    pub max_index_identifier_size: usize,
}
impl Capabilities {
    /// Returns the limits of this implementation.
    pub fn get() -> Self {
        Capabilities {
            max_name_size: MAX_NAME_SIZE,
            max_descriptor_size: MAX_DESCRIPTOR_SIZE,
            max_programs: MAX_PROGRAMS,
            max_streams_per_program: MAX_STREAMS_PER_PROGRAM,
            max_buffers: MAX_BUFFERS,
            max_scatter_pages: MAX_SCATTER_PAGES,
            max_index_identifier_size: MAX_INDEX_IDENTIFIER_SIZE,
        }
    }
}

/// Session wide settings given to [`Multiplexor::open`].
///
/// [`Multiplexor::open`]: ./struct.Multiplexor.html#method.open
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiplexorConfig {
    /// Duration of one output pass, in 90 kHz ticks (900..=9000).
    pub pcr_period: u64,

    /// Target bitrate in bits per second.
    pub bitrate: u32,

    /// Pad every pass with null packets up to the target bitrate.
    pub fixed_bitrate: bool,

    /// Emit a dedicated PCR packet on `pcr_pid` at the start of every pass.
    pub generate_pcr_stream: bool,
    pub pcr_pid: Pid,

    pub generate_pat_pmt: bool,
    pub generate_sdt: bool,

    /// Report index records in the output status.
    pub generate_index: bool,

    /// Precede every packet with the low 32 bits of its 27 MHz clock.
    pub time_stamped_packets: bool,

    pub transport_stream_id: u16,

    /// Interval between table repetitions, in 90 kHz ticks. Zero disables
    /// table output.
    pub table_period: u64,

    /// Set the discontinuity indicator on the next dedicated PCR packet.
    pub pcr_discontinuity: bool,

    /// Set the discontinuity indicator on the tables until the next DIT.
    pub table_discontinuity: bool,
}
impl MultiplexorConfig {
    pub const MIN_PCR_PERIOD: u64 = 900;
    pub const MAX_PCR_PERIOD: u64 = 9000;
    pub const MIN_BITRATE: u32 = 100 * 1024;
    pub const MAX_BITRATE: u32 = 60 * 1024 * 1024;

    pub(crate) fn validate(&self) -> Result<()> {
        track_assert!(
            Self::MIN_PCR_PERIOD <= self.pcr_period && self.pcr_period <= Self::MAX_PCR_PERIOD,
            ErrorKind::InvalidParameter,
            "Invalid PCR period: {}",
            self.pcr_period
        );
        track_assert!(
            Self::MIN_BITRATE <= self.bitrate && self.bitrate <= Self::MAX_BITRATE,
            ErrorKind::InvalidParameter,
            "Invalid bitrate: {}",
            self.bitrate
        );
        track_assert!(
            !self.generate_sdt || self.generate_pat_pmt,
            ErrorKind::InvalidParameter,
            "SDT generation requires PAT/PMT generation"
        );
        if self.generate_pcr_stream {
            track_assert!(
                self.pcr_pid != Pid::NULL,
                ErrorKind::InvalidParameter,
                "Invalid PCR PID: {}",
                self.pcr_pid.as_u16()
            );
        }
        Ok(())
    }

    /// Bits occupied by one output packet, timestamp included.
    pub(crate) fn bits_per_packet(&self) -> u64 {
        if self.time_stamped_packets {
            8 * 192
        } else {
            8 * 188
        }
    }
}
impl Default for MultiplexorConfig {
    fn default() -> Self {
        MultiplexorConfig {
            pcr_period: 4500,
            bitrate: 10_000_000,
            fixed_bitrate: false,
            generate_pcr_stream: false,
            pcr_pid: Pid::NULL,
            generate_pat_pmt: true,
            generate_sdt: false,
            generate_index: false,
            time_stamped_packets: false,
            transport_stream_id: 1,
            table_period: 4500,
            pcr_discontinuity: false,
            table_discontinuity: false,
        }
    }
}

/// Parameters of a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramParameters {
    /// Slot of the program (`0..MAX_PROGRAMS`).
    pub program_id: usize,

    pub program_number: u16,

    /// PID of the program's PMT (`1..=0x1ffe`).
    pub pmt_pid: Pid,

    /// A program carrying raw sections only: it has no PAT entry, PMT or SDT
    /// service and is never reported as underflowing.
    pub tables_program: bool,

    /// Sets `free_CA_mode` on the program's SDT service.
    pub streams_may_be_scrambled: bool,

    pub provider_name: String,
    pub service_name: String,

    /// Raw program level PMT descriptors.
    pub descriptor: Vec<u8>,
}
impl ProgramParameters {
    pub(crate) fn validate(&self) -> Result<()> {
        track_assert!(
            self.program_id < MAX_PROGRAMS,
            ErrorKind::InvalidParameter,
            "Invalid program id: {}",
            self.program_id
        );
        track_assert!(
            self.pmt_pid.as_u16() != 0 && self.pmt_pid != Pid::NULL,
            ErrorKind::InvalidParameter,
            "Invalid PMT PID: {}",
            self.pmt_pid.as_u16()
        );
        track_assert!(
            self.descriptor.len() <= MAX_DESCRIPTOR_SIZE,
            ErrorKind::InvalidParameter,
            "Descriptor too large: {}",
            self.descriptor.len()
        );
        track_assert!(
            self.provider_name.len() < MAX_NAME_SIZE && self.service_name.len() < MAX_NAME_SIZE,
            ErrorKind::InvalidParameter,
            "Name too long"
        );
        Ok(())
    }
}
impl Default for ProgramParameters {
    fn default() -> Self {
        ProgramParameters {
            program_id: 0,
            program_number: 1,
            pmt_pid: Pid::from(0x20),
            tables_program: false,
            streams_may_be_scrambled: false,
            provider_name: String::new(),
            service_name: String::new(),
            descriptor: Vec::new(),
        }
    }
}

/// Parameters of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamParameters {
    pub program_id: usize,

    /// Slot of the stream within its program (`0..MAX_STREAMS_PER_PROGRAM`).
    pub stream_id: usize,

    /// `true` for PES framed data, `false` for raw sections.
    pub stream_pes: bool,

    pub stream_pid: Pid,
    pub stream_type: StreamType,

    /// The stream carries its program's PCR.
    pub incorporate_pcr_packet: bool,

    /// Raw stream level PMT descriptors.
    pub descriptor: Vec<u8>,

    /// Size of the T-STD decoder bit buffer, in bits.
    pub decoder_bit_buffer_size: u32,

    /// How far beyond the current period (in 90 kHz ticks) queued data may
    /// be looked at to fill the bit buffer.
    pub multiplex_ahead_limit: u64,

    /// Largest step between consecutive DTS values (in 90 kHz ticks).
    /// Zero disables the check.
    pub dts_integrity_threshold: u64,
}
impl StreamParameters {
    pub const MAX_DECODER_BIT_BUFFER_SIZE: u32 = 64 * 1024 * 1024;

    pub(crate) fn validate(&self) -> Result<()> {
        track_assert!(
            self.program_id < MAX_PROGRAMS,
            ErrorKind::InvalidParameter,
            "Invalid program id: {}",
            self.program_id
        );
        track_assert!(
            self.stream_id < MAX_STREAMS_PER_PROGRAM,
            ErrorKind::InvalidParameter,
            "Invalid stream id: {}",
            self.stream_id
        );
        track_assert!(
            self.stream_pid != Pid::NULL,
            ErrorKind::InvalidParameter,
            "Invalid stream PID: {}",
            self.stream_pid.as_u16()
        );
        track_assert!(
            self.descriptor.len() <= MAX_DESCRIPTOR_SIZE,
            ErrorKind::InvalidParameter,
            "Descriptor too large: {}",
            self.descriptor.len()
        );
        track_assert!(
            self.decoder_bit_buffer_size <= Self::MAX_DECODER_BIT_BUFFER_SIZE,
            ErrorKind::InvalidParameter,
            "Decoder bit buffer too large: {}",
            self.decoder_bit_buffer_size
        );
        Ok(())
    }
}

/// Parameters of one output pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputParameters {
    /// Capacity of the caller's output, in bytes.
    pub output_size: usize,

    /// End of stream: streams running out of data are not underflows.
    pub flush: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(MultiplexorConfig::default().validate().is_ok());

        let config = MultiplexorConfig {
            pcr_period: 899,
            ..MultiplexorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MultiplexorConfig {
            bitrate: 60 * 1024 * 1024 + 1,
            ..MultiplexorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MultiplexorConfig {
            generate_pat_pmt: false,
            generate_sdt: true,
            ..MultiplexorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MultiplexorConfig {
            generate_pcr_stream: true,
            ..MultiplexorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn program_validation() {
        assert!(ProgramParameters::default().validate().is_ok());

        let params = ProgramParameters {
            program_id: MAX_PROGRAMS,
            ..ProgramParameters::default()
        };
        assert_eq!(
            params.validate().map_err(|e| *e.kind()),
            Err(ErrorKind::InvalidParameter)
        );

        let params = ProgramParameters {
            pmt_pid: Pid::PAT,
            ..ProgramParameters::default()
        };
        assert!(params.validate().is_err());

        let params = ProgramParameters {
            descriptor: vec![0; MAX_DESCRIPTOR_SIZE + 1],
            ..ProgramParameters::default()
        };
        assert!(params.validate().is_err());
    }
}
