use crate::probe::AudioSource;
use crate::progress::{realtime_factor, ProgressSink};
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::debug;
use vac_core::{Encoder, Resampler, Result, VacError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineReport {
    /// Interleaved input samples handed to the resampler.
    pub samples_read: u64,
    /// Frames the resampler emitted, flush included.
    pub frames_out: u64,
    pub elapsed: Duration,
    pub realtime_factor: f64,
}

/// Read, resample and encode loop over one opened source.
pub struct Pipeline<R, S, E> {
    source: AudioSource<R>,
    resampler: S,
    encoder: E,
    output: Vec<f32>,
}

impl<R: Read, S: Resampler, E: Encoder> Pipeline<R, S, E> {
    pub fn new(source: AudioSource<R>, resampler: S, encoder: E) -> Result<Self> {
        let descriptor = source.descriptor();
        // Room for one block plus what the filter may carry over.
        let capacity =
            (descriptor.output_block_frames() + 4096) * descriptor.channel_count() as usize;
        let mut output = Vec::new();
        output
            .try_reserve_exact(capacity)
            .map_err(|_| VacError::AllocationError(capacity * 4))?;

        Ok(Self {
            source,
            resampler,
            encoder,
            output,
        })
    }

    pub fn source(&self) -> &AudioSource<R> {
        &self.source
    }

    pub fn into_parts(self) -> (AudioSource<R>, S, E) {
        (self.source, self.resampler, self.encoder)
    }

    /// Runs the source to exhaustion, then flushes the resampler and drains
    /// the encoder.
    pub fn run(&mut self, progress: &mut dyn ProgressSink) -> Result<PipelineReport> {
        let descriptor = self.source.descriptor().clone();
        let channels = descriptor.channel_count() as usize;
        let nominal = descriptor.block_samples();
        let total = descriptor.total_samples();
        let samples_per_sec = descriptor.sampling_rate() as u64 * channels as u64;

        let started = Instant::now();
        let mut samples_read: u64 = 0;
        let mut frames_out: u64 = 0;

        loop {
            let read = self.source.read_block(nominal)?;
            let count = (read as u64).min(total - samples_read) as usize;
            let count = count - count % channels;

            let frames = self
                .resampler
                .process(self.source.samples(count), &mut self.output)?;
            self.encoder.write_float(&self.output)?;
            frames_out += frames as u64;
            samples_read += count as u64;

            debug!(read, count, frames, samples_read, "pipeline iteration");
            progress.update(samples_read, total, started.elapsed());

            if count < nominal {
                break;
            }
        }

        let frames = self.resampler.flush(&mut self.output)?;
        self.encoder.write_float(&self.output)?;
        frames_out += frames as u64;
        self.encoder.drain()?;

        let elapsed = started.elapsed();
        progress.finish(samples_read, elapsed);
        let report = PipelineReport {
            samples_read,
            frames_out,
            elapsed,
            realtime_factor: realtime_factor(samples_read, samples_per_sec, elapsed),
        };
        debug!(?report, "pipeline finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::probe;
    use crate::progress::NoProgress;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;
    use vac_core::test_utils::{build_wav, encode_pcm, sine_wave, WavFixture};

    /// Passes samples through as f32 without changing the rate.
    #[derive(Default)]
    struct Identity {
        channels: usize,
        flushed: bool,
    }

    impl Resampler for Identity {
        fn process(&mut self, input: &[u8], output: &mut Vec<f32>) -> Result<usize> {
            output.clear();
            output.extend(
                input
                    .chunks_exact(2)
                    .map(|s| LittleEndian::read_i16(s) as f32 / 32768.0),
            );
            Ok(output.len() / self.channels)
        }

        fn flush(&mut self, output: &mut Vec<f32>) -> Result<usize> {
            output.clear();
            self.flushed = true;
            Ok(0)
        }
    }

    #[derive(Default)]
    struct Collect {
        samples: Vec<f32>,
        writes: usize,
        drained: bool,
    }

    impl Encoder for Collect {
        fn write_float(&mut self, samples: &[f32]) -> Result<()> {
            assert!(!self.drained);
            self.samples.extend_from_slice(samples);
            self.writes += 1;
            Ok(())
        }

        fn drain(&mut self) -> Result<()> {
            self.drained = true;
            Ok(())
        }
    }

    fn source(frames: usize) -> AudioSource<Cursor<Vec<u8>>> {
        let sine = sine_wave(frames, 2, 48_000, 1_000.0, 0.5);
        let bytes = build_wav(&WavFixture::pcm(2, 48_000, 16), &encode_pcm(&sine, 16));
        probe(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn test_emits_every_sample_once() {
        // Two full blocks and a partial one.
        let frames = 96_000 * 2 + 1_234;
        let mut pipeline = Pipeline::new(
            source(frames),
            Identity {
                channels: 2,
                ..Default::default()
            },
            Collect::default(),
        )
        .unwrap();
        let report = pipeline.run(&mut NoProgress).unwrap();
        assert_eq!(report.samples_read, frames as u64 * 2);
        assert_eq!(report.frames_out, frames as u64);

        let (_, resampler, encoder) = pipeline.into_parts();
        assert!(resampler.flushed);
        assert!(encoder.drained);
        assert_eq!(encoder.samples.len(), frames * 2);
        // Three reads plus the flush.
        assert_eq!(encoder.writes, 4);
    }

    #[test]
    fn test_exact_multiple_ends_on_empty_read() {
        let mut pipeline = Pipeline::new(
            source(96_000),
            Identity {
                channels: 2,
                ..Default::default()
            },
            Collect::default(),
        )
        .unwrap();
        let report = pipeline.run(&mut NoProgress).unwrap();
        assert_eq!(report.samples_read, 192_000);
        let (_, _, encoder) = pipeline.into_parts();
        assert_eq!(encoder.writes, 3);
    }

    #[test]
    fn test_never_exceeds_declared_total() {
        // The data chunk claims fewer bytes than follow it.
        let sine = sine_wave(1_000, 2, 48_000, 1_000.0, 0.5);
        let mut bytes = build_wav(&WavFixture::pcm(2, 48_000, 16), &encode_pcm(&sine, 16));
        let data_len_at = bytes.len() - 4_000 - 4;
        LittleEndian::write_u32(&mut bytes[data_len_at..data_len_at + 4], 2_002);
        let source = probe(Cursor::new(bytes)).unwrap();
        assert_eq!(source.descriptor().total_samples(), 1_001);

        let mut pipeline = Pipeline::new(
            source,
            Identity {
                channels: 2,
                ..Default::default()
            },
            Collect::default(),
        )
        .unwrap();
        let report = pipeline.run(&mut NoProgress).unwrap();
        // Rounded down to whole frames.
        assert_eq!(report.samples_read, 1_000);
    }
}
