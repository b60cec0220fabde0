//! WAVE and FLAC to Ogg Opus: probe the container, normalize samples,
//! resample to 48 kHz and encode.

pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod reader;
pub mod resample;

pub use pipeline::{Pipeline, PipelineReport};
pub use probe::{open_file, probe, AudioSource};
pub use progress::{ConsoleProgress, NoProgress, ProgressSink};
pub use reader::{DecodeBuffer, SampleReader};
pub use resample::{output_frames_for, StreamResampler};

use std::io::{Read, Write};
use vac_core::{Result, TARGET_SAMPLE_RATE};
use vac_opus::{OggOpusEncoder, ResolvedSettings};

pub type OpusPipeline<R, W> = Pipeline<R, StreamResampler, OggOpusEncoder<W>>;

/// Wires `source` through a 48 kHz resampler into an Ogg Opus stream on
/// `writer`. The Opus headers are written before this returns.
pub fn opus_pipeline<R: Read, W: Write>(
    source: AudioSource<R>,
    writer: W,
    settings: &ResolvedSettings,
) -> Result<OpusPipeline<R, W>> {
    let descriptor = source.descriptor();
    let channels = descriptor.channel_count();
    let resampler = StreamResampler::new(
        descriptor.sampling_rate(),
        TARGET_SAMPLE_RATE,
        channels as usize,
        descriptor.sample_format(),
    )?;
    let encoder = OggOpusEncoder::new(writer, channels, descriptor.sampling_rate(), settings)?;
    Pipeline::new(source, resampler, encoder)
}
