use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use tracing::debug;
use vac_core::audio_bytes::{deinterleave_to_f32, interleave_f32_into};
use vac_core::{Resampler, Result, SampleFormat, VacError};

/// Input frames handed to the sinc filter per call.
const CHUNK_FRAMES: usize = 1024;

/// Output bookkeeping: drops the filter's start-up delay and caps the total.
#[derive(Debug, Default)]
struct OutputTrim {
    delay: usize,
    frames: u64,
}

impl OutputTrim {
    fn emit(&mut self, resampled: &[Vec<f32>], limit: Option<u64>, output: &mut Vec<f32>) -> usize {
        let frames = resampled.first().map_or(0, Vec::len);
        let skip = self.delay.min(frames);
        self.delay -= skip;

        let mut keep = frames - skip;
        if let Some(limit) = limit {
            keep = keep.min(limit.saturating_sub(self.frames) as usize);
        }
        interleave_f32_into(resampled, skip, keep, output);
        self.frames += keep as u64;
        keep
    }
}

/// `ceil(input_frames * target_rate / source_rate)` in exact integer math.
pub fn output_frames_for(input_frames: u64, source_rate: u32, target_rate: u32) -> u64 {
    let scaled = input_frames as u128 * target_rate as u128;
    scaled.div_ceil(source_rate as u128) as u64
}

fn resample_error(e: impl std::fmt::Display) -> VacError {
    VacError::Resample(e.to_string())
}

/// Sample-rate converter from the source rate to a fixed target rate.
///
/// Input is buffered per channel until a whole filter chunk is available.
/// The filter's start-up delay is dropped from the front of the output and
/// [`Resampler::flush`] pads the tail, so the total output is exactly
/// `ceil(input_frames * target / source)` frames. A source already at the
/// target rate is only converted to `f32`.
pub struct StreamResampler {
    format: SampleFormat,
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<Vec<f32>>,
    source_rate: u32,
    target_rate: u32,
    input_frames: u64,
    trim: OutputTrim,
}

impl StreamResampler {
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
        format: SampleFormat,
    ) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || channels == 0 {
            return Err(VacError::Resample(format!(
                "cannot resample {} channels from {} Hz to {} Hz",
                channels, source_rate, target_rate
            )));
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let inner = if source_rate == target_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            Some(
                SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, channels)
                    .map_err(resample_error)?,
            )
        };
        let delay = inner.as_ref().map_or(0, |r| r.output_delay());

        debug!(
            source_rate,
            target_rate,
            channels,
            ?format,
            delay,
            passthrough = inner.is_none(),
            "resampler ready"
        );

        Ok(Self {
            format,
            inner,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            source_rate,
            target_rate,
            input_frames: 0,
            trim: OutputTrim {
                delay,
                frames: 0,
            },
        })
    }

    pub fn input_frames(&self) -> u64 {
        self.input_frames
    }

    pub fn output_frames(&self) -> u64 {
        self.trim.frames
    }

    /// Output frames owed once all input has been seen.
    pub fn expected_output_frames(&self) -> u64 {
        output_frames_for(self.input_frames, self.source_rate, self.target_rate)
    }
}

impl Resampler for StreamResampler {
    fn process(&mut self, input: &[u8], output: &mut Vec<f32>) -> Result<usize> {
        output.clear();
        let before = self.pending[0].len();
        deinterleave_to_f32(input, self.format, &mut self.pending);
        self.input_frames += (self.pending[0].len() - before) as u64;

        let Some(inner) = self.inner.as_mut() else {
            let frames = self.pending[0].len();
            interleave_f32_into(&self.pending, 0, frames, output);
            self.pending.iter_mut().for_each(Vec::clear);
            self.trim.frames += frames as u64;
            return Ok(frames);
        };

        let mut written = 0;
        let mut pos = 0;
        loop {
            let needed = inner.input_frames_next();
            if self.pending[0].len() - pos < needed {
                break;
            }
            let chunk: Vec<&[f32]> = self
                .pending
                .iter()
                .map(|c| &c[pos..pos + needed])
                .collect();
            let resampled = inner.process(&chunk, None).map_err(resample_error)?;
            written += self.trim.emit(&resampled, None, output);
            pos += needed;
        }
        self.pending.iter_mut().for_each(|c| {
            c.drain(..pos);
        });
        Ok(written)
    }

    fn flush(&mut self, output: &mut Vec<f32>) -> Result<usize> {
        output.clear();
        let expected = self.expected_output_frames();
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let mut written = 0;

        if !self.pending[0].is_empty() {
            let resampled = inner
                .process_partial(Some(&self.pending[..]), None)
                .map_err(resample_error)?;
            written += self.trim.emit(&resampled, Some(expected), output);
            self.pending.iter_mut().for_each(Vec::clear);
        }

        while self.trim.frames < expected {
            let resampled = inner
                .process_partial::<Vec<f32>>(None, None)
                .map_err(resample_error)?;
            if resampled.first().map_or(true, Vec::is_empty) {
                break;
            }
            written += self.trim.emit(&resampled, Some(expected), output);
        }

        debug!(
            input_frames = self.input_frames,
            output_frames = self.trim.frames,
            "resampler flushed"
        );
        Ok(written)
    }
}
