use crate::audio_types::SampleFormat;
use byteorder::{ByteOrder, LittleEndian};

/// Unsigned 8-bit WAVE sample to signed 16-bit: flip the sign bit, then scale.
#[inline]
pub fn normalize_u8(sample: u8) -> i16 {
    ((sample ^ 0x80) as i8 as i16) << 8
}

#[inline]
pub fn denormalize_u8(sample: i16) -> u8 {
    ((sample >> 8) as u8) ^ 0x80
}

/// Little-endian signed 24-bit triplet left-justified into an `i32`.
#[inline]
pub fn normalize_s24le(sample_bytes: [u8; 3]) -> i32 {
    i32::from_le_bytes([0, sample_bytes[0], sample_bytes[1], sample_bytes[2]])
}

#[inline]
pub fn denormalize_s24le(sample: i32) -> [u8; 3] {
    let bytes = sample.to_le_bytes();
    [bytes[1], bytes[2], bytes[3]]
}

/// Appends interleaved little-endian samples to per-channel `f32` vectors.
/// Integers are scaled to [-1.0, 1.0) by their full-scale value.
pub fn deinterleave_to_f32(input: &[u8], format: SampleFormat, channels: &mut [Vec<f32>]) {
    let channel_count = channels.len();
    let width = format.bytes_per_sample();
    let frame_bytes = width * channel_count;

    input.chunks_exact(frame_bytes).for_each(|frame| {
        frame
            .chunks_exact(width)
            .zip(channels.iter_mut())
            .for_each(|(bytes, channel)| channel.push(sample_to_f32(bytes, format)));
    });
}

#[inline]
fn sample_to_f32(bytes: &[u8], format: SampleFormat) -> f32 {
    match format {
        SampleFormat::I16 => LittleEndian::read_i16(bytes) as f32 / 32768.0,
        SampleFormat::I32 => (LittleEndian::read_i32(bytes) as f64 / 2147483648.0) as f32,
        SampleFormat::F32 => LittleEndian::read_f32(bytes),
        SampleFormat::F64 => LittleEndian::read_f64(bytes) as f32,
    }
}

/// Interleaves `frames` frames starting at `start` of each channel onto `output`.
pub fn interleave_f32_into(
    channels: &[Vec<f32>],
    start: usize,
    frames: usize,
    output: &mut Vec<f32>,
) {
    output.reserve(frames * channels.len());
    for i in start..start + frames {
        for channel in channels {
            output.push(channel[i]);
        }
    }
}
