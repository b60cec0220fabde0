//! Test fixtures: in-memory WAVE files, synthetic signals and level checks.
use byteorder::{ByteOrder, LittleEndian};
use std::f32::consts::PI;

/// Shape of the `fmt ` chunk to emit.
#[derive(Debug, Clone)]
pub struct WavFixture {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Emit a 40-byte WAVE_FORMAT_EXTENSIBLE body carrying `format_tag` in the GUID.
    pub extensible: bool,
    /// Chunk written between `fmt ` and `data`.
    pub extra_chunk: Option<([u8; 4], Vec<u8>)>,
}

impl WavFixture {
    pub fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            format_tag: 1,
            channels,
            sample_rate,
            bits_per_sample,
            extensible: false,
            extra_chunk: None,
        }
    }

    pub fn float(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            format_tag: 3,
            ..Self::pcm(channels, sample_rate, bits_per_sample)
        }
    }
}

/// Builds a complete RIFF/WAVE file around `data`.
pub fn build_wav(fixture: &WavFixture, data: &[u8]) -> Vec<u8> {
    let block_align = fixture.channels * (fixture.bits_per_sample / 8);
    let byte_rate = fixture.sample_rate * block_align as u32;

    let mut fmt = vec![0u8; if fixture.extensible { 40 } else { 16 }];
    let tag = if fixture.extensible {
        0xFFFE
    } else {
        fixture.format_tag
    };
    LittleEndian::write_u16(&mut fmt[0..2], tag);
    LittleEndian::write_u16(&mut fmt[2..4], fixture.channels);
    LittleEndian::write_u32(&mut fmt[4..8], fixture.sample_rate);
    LittleEndian::write_u32(&mut fmt[8..12], byte_rate);
    LittleEndian::write_u16(&mut fmt[12..14], block_align);
    LittleEndian::write_u16(&mut fmt[14..16], fixture.bits_per_sample);
    if fixture.extensible {
        LittleEndian::write_u16(&mut fmt[16..18], 22);
        LittleEndian::write_u16(&mut fmt[18..20], fixture.bits_per_sample);
        LittleEndian::write_u32(&mut fmt[20..24], 0);
        LittleEndian::write_u16(&mut fmt[24..26], fixture.format_tag);
        // Remainder of the KSDATAFORMAT_SUBTYPE GUID.
        fmt[26..40].copy_from_slice(&[
            0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
        ]);
    }

    let mut body = Vec::new();
    body.extend_from_slice(b"WAVE");
    push_chunk(&mut body, b"fmt ", &fmt);
    if let Some((id, payload)) = &fixture.extra_chunk {
        push_chunk(&mut body, id, payload);
    }
    body.extend_from_slice(b"data");
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(data);

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn push_chunk(out: &mut Vec<u8>, id: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
}

/// Interleaved sine, the same tone on every channel.
pub fn sine_wave(
    frames: usize,
    channels: usize,
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
) -> Vec<f32> {
    let mut samples = Vec::with_capacity(frames * channels);
    for n in 0..frames {
        let value = amplitude * (2.0 * PI * frequency * n as f32 / sample_rate as f32).sin();
        samples.extend(std::iter::repeat(value).take(channels));
    }
    samples
}

/// Quantizes `[-1.0, 1.0]` samples to little-endian LPCM of the given width.
/// 8-bit output is unsigned, as WAVE stores it.
pub fn encode_pcm(samples: &[f32], bits_per_sample: u16) -> Vec<u8> {
    let width = bits_per_sample as usize / 8;
    let mut out = Vec::with_capacity(samples.len() * width);
    for &sample in samples {
        let value = quantize(sample, bits_per_sample);
        match bits_per_sample {
            8 => out.push((value as i8 as u8) ^ 0x80),
            16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
            24 => out.extend_from_slice(&(value as i32).to_le_bytes()[..3]),
            32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            _ => panic!("no LPCM encoding for {} bits", bits_per_sample),
        }
    }
    out
}

/// Quantizes to a signed integer of `bits` significant bits.
pub fn quantize(sample: f32, bits: u16) -> i64 {
    let full_scale = (1i64 << (bits - 1)) as f64;
    let scaled = (sample.clamp(-1.0, 1.0) as f64 * full_scale).round() as i64;
    scaled.clamp(-(full_scale as i64), full_scale as i64 - 1)
}

pub fn encode_float(samples: &[f32], bits_per_sample: u16) -> Vec<u8> {
    let mut out = Vec::new();
    for &sample in samples {
        match bits_per_sample {
            32 => out.extend_from_slice(&sample.to_le_bytes()),
            64 => out.extend_from_slice(&(sample as f64).to_le_bytes()),
            _ => panic!("no float encoding for {} bits", bits_per_sample),
        }
    }
    out
}

/// Root-mean-square level of a block of samples.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

pub fn rms_db(samples: &[f32]) -> f64 {
    let level = rms(samples);
    if level > 0.0 {
        20.0 * level.log10()
    } else {
        -96.0
    }
}
