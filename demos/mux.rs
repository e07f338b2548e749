extern crate clap;
extern crate mpeg2ts_mux;
#[macro_use]
extern crate trackable;

use std::fs::File;
use std::io::{BufWriter, Write};

use clap::{App, Arg};
use mpeg2ts_mux::es::{StreamId, StreamType};
use mpeg2ts_mux::mux::{Buffer, BufferPool, Multiplexor, MultiplexorConfig, OutputParameters,
                       OutputStatus, ProgramParameters, StreamParameters, SupplyError};
use mpeg2ts_mux::pes::PesHeader;
use mpeg2ts_mux::time::{pcr_limit, time_is_before, Timestamp};
use mpeg2ts_mux::ts::Pid;
use mpeg2ts_mux::{ErrorKind, Result};
use trackable::error::Failure;

const START_DTS: u64 = 10 * 90_000;

// Synthetic access units of one elementary stream.
struct Source {
    stream_id: usize,
    pes_stream_id: StreamId,
    frame_size: usize,
    frame_duration: u64,
    next_dts: u64,
    frames_left: u64,
}
impl Source {
    fn supply_until(&mut self, mux: &Multiplexor, until: u64) -> Result<()> {
        while self.frames_left != 0 && time_is_before(self.next_dts, until) {
            let buffer = track!(self.next_buffer(mux))?;
            if let Err(SupplyError { error, buffer }) = mux.supply_buffer(buffer) {
                track!(mux.free_buffer_structure(buffer))?;
                return Err(track!(error));
            }
        }
        Ok(())
    }

    fn next_buffer(&mut self, mux: &Multiplexor) -> Result<Buffer> {
        let dts = track!(Timestamp::new(self.next_dts))?;
        let header = PesHeader {
            stream_id: self.pes_stream_id,
            data_alignment_indicator: true,
            pts: Some(dts),
            dts: None,
        };
        let mut data = Vec::with_capacity(header.size() + self.frame_size);
        track!(header.write_to(&mut data, self.frame_size))?;
        data.resize(header.size() + self.frame_size, self.frames_left as u8);

        let mut buffer = track!(mux.get_buffer_structure(1))?;
        buffer.program_id = 0;
        buffer.stream_id = self.stream_id;
        buffer.pages[0].data = data;
        buffer.dts = self.next_dts;
        buffer.dts_duration = self.frame_duration;
        buffer.user_data = self.next_dts;

        self.next_dts = pcr_limit(self.next_dts + self.frame_duration);
        self.frames_left -= 1;
        Ok(buffer)
    }
}

fn stream(stream_id: usize, pid: u16, stream_type: StreamType, bit_buffer: u32) -> StreamParameters {
    StreamParameters {
        program_id: 0,
        stream_id,
        stream_pes: true,
        stream_pid: track_try_unwrap!(Pid::new(pid)),
        stream_type,
        incorporate_pcr_packet: stream_id == 0,
        descriptor: Vec::new(),
        decoder_bit_buffer_size: bit_buffer,
        multiplex_ahead_limit: 0,
        dts_integrity_threshold: 90_000,
    }
}

fn main() {
    let matches = App::new("mux")
        .about("Multiplexes synthetic audio and video into a transport stream file")
        .arg(
            Arg::with_name("OUTPUT")
                .long("output")
                .takes_value(true)
                .default_value("out.ts"),
        )
        .arg(
            Arg::with_name("DURATION")
                .long("duration")
                .takes_value(true)
                .default_value("10"),
        )
        .arg(
            Arg::with_name("BITRATE")
                .long("bitrate")
                .takes_value(true)
                .default_value("4000000"),
        )
        .arg(
            Arg::with_name("VIDEO_FRAME_SIZE")
                .long("video-frame-size")
                .takes_value(true)
                .default_value("12000"),
        )
        .arg(Arg::with_name("FIXED_BITRATE").long("fixed-bitrate"))
        .arg(Arg::with_name("TIME_STAMPED").long("time-stamped"))
        .get_matches();
    let duration: u64 = track_try_unwrap!(matches
        .value_of("DURATION")
        .unwrap()
        .parse()
        .map_err(Failure::from_error));
    let bitrate: u32 = track_try_unwrap!(matches
        .value_of("BITRATE")
        .unwrap()
        .parse()
        .map_err(Failure::from_error));
    let video_frame_size: usize = track_try_unwrap!(matches
        .value_of("VIDEO_FRAME_SIZE")
        .unwrap()
        .parse()
        .map_err(Failure::from_error));

    let config = MultiplexorConfig {
        pcr_period: 3600,
        bitrate,
        fixed_bitrate: matches.is_present("FIXED_BITRATE"),
        time_stamped_packets: matches.is_present("TIME_STAMPED"),
        generate_sdt: true,
        table_period: 9000,
        ..MultiplexorConfig::default()
    };
    let release = |pool: &BufferPool, cancelled: bool, buffer: Buffer| {
        if cancelled {
            eprintln!("Cancelled buffer with DTS {}", buffer.user_data);
        }
        let _ = pool.free_buffer_structure(buffer);
    };
    let mux = track_try_unwrap!(Multiplexor::open(config, release));
    track_try_unwrap!(mux.add_program(ProgramParameters {
        program_number: 1,
        provider_name: "mpeg2ts-mux".to_owned(),
        service_name: "demo".to_owned(),
        ..ProgramParameters::default()
    }));
    track_try_unwrap!(mux.add_stream(stream(0, 0x100, StreamType::H264, 2_000_000)));
    track_try_unwrap!(mux.add_stream(stream(1, 0x101, StreamType::AdtsAac, 30_000)));

    let mut sources = vec![
        Source {
            stream_id: 0,
            pes_stream_id: StreamId::new(0xE0),
            frame_size: video_frame_size,
            frame_duration: 3600,
            next_dts: START_DTS,
            frames_left: duration * 25,
        },
        Source {
            stream_id: 1,
            pes_stream_id: StreamId::new(0xC0),
            frame_size: 384,
            frame_duration: 1920,
            next_dts: START_DTS,
            frames_left: duration * 90_000 / 1920,
        },
    ];

    let mut horizon = 2 * 90_000;
    for source in &mut sources {
        track_try_unwrap!(source.supply_until(&mux, START_DTS + horizon));
    }

    let file = track_try_unwrap!(
        File::create(matches.value_of("OUTPUT").unwrap()).map_err(Failure::from_error)
    );
    let mut out = BufWriter::new(file);
    let mut status = OutputStatus::default();
    loop {
        let exhausted = sources.iter().all(|s| s.frames_left == 0);
        let params = OutputParameters {
            output_size: 1 << 20,
            flush: exhausted,
        };
        match mux.prepare_output(&params, &mut status) {
            Ok(()) => {}
            Err(ref e) if *e.kind() == ErrorKind::DeliveryFailure => {
                eprintln!("Late delivery at PCR {}", status.pcr);
            }
            Err(ref e) if *e.kind() == ErrorKind::InputUnderflow && !exhausted => {
                horizon += 90_000;
                let until = pcr_limit(START_DTS + horizon);
                for source in &mut sources {
                    track_try_unwrap!(source.supply_until(&mux, until));
                }
                continue;
            }
            Err(e) => panic!("{}", e),
        }
        track_try_unwrap!(mux.perform_output(&mut out, &mut status));
        if exhausted && !status.non_output_data_remains {
            break;
        }

        let until = pcr_limit(status.pcr + status.output_duration + horizon);
        for source in &mut sources {
            track_try_unwrap!(source.supply_until(&mux, until));
        }
    }
    track_try_unwrap!(out.flush().map_err(Failure::from_error));
    track_try_unwrap!(mux.close());
}
