use crate::error::Result;

/// Streaming sample-rate converter. Input is raw interleaved little-endian
/// samples in the format declared at construction; output is interleaved `f32`.
pub trait Resampler {
    /// Converts one block, appending to `output` after clearing it. Returns
    /// the number of frames written.
    fn process(&mut self, input: &[u8], output: &mut Vec<f32>) -> Result<usize>;

    /// Emits whatever the filter still holds once input has ended.
    fn flush(&mut self, output: &mut Vec<f32>) -> Result<usize>;
}

/// Lossy encoder fed with interleaved `f32` at the target rate.
pub trait Encoder {
    fn write_float(&mut self, samples: &[f32]) -> Result<()>;

    /// Encodes anything still buffered and finalizes the output.
    fn drain(&mut self) -> Result<()>;
}
