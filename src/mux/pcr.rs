//! Initial PCR selection.
use crate::mux::state::State;
use crate::time::{pcr_limit, MAX_TIMESTAMP};
use crate::{ErrorKind, Result};

impl State {
    /// Picks the PCR of the first pass.
    ///
    /// The first PCR precedes the earliest queued DTS by the time needed to
    /// fill every T-STD buffer at the target bitrate (at least one PCR
    /// period). When that start lies before a timestamp wrap, every emitted
    /// time is shifted so that the output clock starts at zero.
    pub fn generate_initial_pcr(&mut self) -> Result<()> {
        if self.packed_streams.is_empty() {
            self.clock.initial_pcr = 0;
            self.clock.pcr_offset = 0;
            self.clock.initialized = true;
            return Ok(());
        }

        let mut min_dts = None;
        let mut prewrapped = false;
        let mut total_tstd_bits = 0u64;
        for &(program_id, stream_id) in &self.packed_streams {
            let stream = match self.stream(program_id, stream_id) {
                Some(stream) => stream,
                None => continue,
            };
            let head = match stream.buffers.front() {
                Some(head) => head,
                None if self.flushing => continue,
                None => {
                    error!("No data at all for stream {}:{}", program_id, stream_id);
                    self.underflow = Some((program_id, stream_id));
                    track_panic!(
                        ErrorKind::InputUnderflow,
                        "No data for stream {}:{}",
                        program_id,
                        stream_id
                    );
                }
            };
            if !stream.params.stream_pes {
                continue;
            }

            total_tstd_bits += u64::from(stream.params.decoder_bit_buffer_size);
            if head.progress.number_of_transport_packets == 0 {
                debug!(
                    "Stream {}:{} is paused, ignoring for initial PCR",
                    program_id, stream_id
                );
                continue;
            }

            let dts = head.dts;
            let min = *min_dts.get_or_insert(dts);
            if dts < min && min - dts < MAX_TIMESTAMP - min + dts {
                min_dts = Some(dts);
            }
            // A DTS on the far side of the wrap from the others
            if dts > min && dts - min > MAX_TIMESTAMP - dts + min {
                min_dts = Some(dts);
                prewrapped = true;
            }
        }
        let min_dts = min_dts.unwrap_or(0);

        let time_to_fill = (total_tstd_bits * 90_000 / u64::from(self.config.bitrate))
            .max(self.config.pcr_period);
        self.clock.initial_pcr = pcr_limit(min_dts.wrapping_sub(time_to_fill));
        self.clock.pcr_offset = 0;
        self.clock.shift = 0;
        debug!(
            "min_dts={:#011x}, time_to_fill={:#011x}, initial_pcr={:#011x}",
            min_dts, time_to_fill, self.clock.initial_pcr
        );

        if prewrapped || self.clock.initial_pcr > min_dts {
            self.clock.shift = MAX_TIMESTAMP - self.clock.initial_pcr + 1;
            debug!("PCR shift={:#011x}", self.clock.shift);
        }
        self.clock.initialized = true;

        let initial_pcr = self.clock.initial_pcr;
        for &(program_id, stream_id) in &self.packed_streams {
            if let Some(stream) = self.streams[program_id][stream_id].as_mut() {
                let pes = stream.params.stream_pes;
                if let Some(head) = stream.buffers.front_mut() {
                    if head.repeating || (!pes && head.dts == 0) {
                        head.dts = initial_pcr;
                    }
                }
            }
        }
        Ok(())
    }
}
