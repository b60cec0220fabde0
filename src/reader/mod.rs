//! Per-format sample readers.
//!
//! Every reader fills the front of a [`DecodeBuffer`] with normalized
//! interleaved little-endian samples and returns how many it wrote. A count
//! below the request means the source is exhausted.

pub mod flac;
pub mod wave;

use std::io::Read;
use vac_core::wav::WavDataReader;
use vac_core::{try_alloc_bytes, Result, StreamDescriptor};

pub use flac::FlacReader;

/// Reader strategy, chosen once at open time from the container and bit depth.
pub enum SampleReader<R> {
    /// Unsigned 8-bit WAVE, widened to signed 16-bit.
    U8(WavDataReader<R>),
    /// Packed 24-bit WAVE, left-justified into 32-bit.
    S24(WavDataReader<R>),
    /// 16/32/64-bit WAVE copied verbatim; `shift` is log2 of the sample width.
    Direct { data: WavDataReader<R>, shift: u32 },
    Flac(FlacReader<R>),
}

impl<R: Read> SampleReader<R> {
    /// Reads up to `max_samples` interleaved samples into the front of `buffer`.
    pub fn read(&mut self, buffer: &mut DecodeBuffer, max_samples: usize) -> Result<usize> {
        let max_samples = max_samples.min(buffer.block_samples);
        match self {
            SampleReader::U8(data) => Ok(wave::read_u8(data, buffer, max_samples)?),
            SampleReader::S24(data) => Ok(wave::read_s24(data, buffer, max_samples)?),
            SampleReader::Direct { data, shift } => {
                Ok(wave::read_direct(data, *shift, buffer, max_samples)?)
            }
            SampleReader::Flac(reader) => reader.read(buffer, max_samples),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleReader::U8(_) => "u8",
            SampleReader::S24(_) => "s24",
            SampleReader::Direct { .. } => "direct",
            SampleReader::Flac(_) => "flac",
        }
    }
}

/// One iteration's worth of decoded samples, plus scratch space.
///
/// The layout after the sample region depends on the reader: 8-bit and
/// 24-bit WAVE stage raw bytes there before widening them in place, FLAC
/// keeps its window of undecoded bytes there. The buffer is never resized
/// once allocated.
#[derive(Debug)]
pub struct DecodeBuffer {
    bytes: Vec<u8>,
    block_samples: usize,
    sample_width: usize,
}

impl DecodeBuffer {
    /// `extension` extra bytes are reserved past the sample region.
    pub fn new(block_samples: usize, sample_width: usize, extension: usize) -> Result<Self> {
        let bytes = try_alloc_bytes(block_samples * sample_width + extension)?;
        Ok(Self {
            bytes,
            block_samples,
            sample_width,
        })
    }

    /// Sized for the reader a WAVE descriptor selects.
    pub fn for_wave(descriptor: &StreamDescriptor) -> Result<Self> {
        let block = descriptor.block_samples();
        match descriptor.bits_per_sample() {
            // Normalized i16 plus the raw byte staged behind it.
            8 => Self::new(block, 2, 0),
            // Normalized i32 overlapping the raw triplets staged in the tail.
            24 => Self::new(block, 4, 0),
            _ => Self::new(block, descriptor.source_bytes_per_sample(), 0),
        }
    }

    pub fn block_samples(&self) -> usize {
        self.block_samples
    }

    /// The first `count` normalized samples.
    pub fn samples(&self, count: usize) -> &[u8] {
        &self.bytes[..count * self.sample_width]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The sample region and the extension behind it.
    pub(crate) fn split_extension(&mut self) -> (&mut [u8], &mut [u8]) {
        let region = self.block_samples * self.sample_width;
        self.bytes.split_at_mut(region)
    }
}
