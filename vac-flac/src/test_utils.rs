//! FLAC stream writer for building decoder fixtures in memory.
//!
//! It produces valid streams but does no searching: the caller picks the
//! subframe kind and stereo mode for every frame.
use crate::bitstream::{crc16, crc8};

#[derive(Debug, Clone)]
pub enum Subframe {
    Constant,
    Verbatim,
    /// Fixed polynomial predictor of order 0..=4.
    Fixed(usize),
    /// Quantized LPC with caller-supplied coefficients.
    Lpc {
        coefficients: Vec<i32>,
        precision: u32,
        shift: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stereo {
    Independent,
    LeftSide,
    RightSide,
    MidSide,
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    bits: u32,
}

impl BitWriter {
    fn write_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.acc = (self.acc << 1) | ((value >> i) & 1);
            self.bits += 1;
            if self.bits == 8 {
                self.bytes.push(self.acc as u8);
                self.acc = 0;
                self.bits = 0;
            }
        }
    }

    fn write_signed(&mut self, value: i64, n: u32) {
        let mask = if n == 64 { u64::MAX } else { (1u64 << n) - 1 };
        self.write_bits(value as u64 & mask, n);
    }

    fn write_unary(&mut self, zeros: u64) {
        for _ in 0..zeros {
            self.write_bits(0, 1);
        }
        self.write_bits(1, 1);
    }

    fn write_rice(&mut self, value: i64, param: u32) {
        let folded = ((value << 1) ^ (value >> 63)) as u64;
        self.write_unary(folded >> param);
        self.write_bits(folded & ((1u64 << param) - 1), param);
    }

    fn write_coded_number(&mut self, n: u64) {
        if n < 0x80 {
            self.write_bits(n, 8);
            return;
        }
        let significant = 64 - n.leading_zeros();
        let len = (2..=7u32)
            .find(|&len| significant <= if len == 7 { 36 } else { 5 * len + 1 })
            .unwrap_or(7);
        let lead = (0xFF00u16 >> len) as u8 as u64;
        self.write_bits(lead | (n >> (6 * (len - 1))), 8);
        for i in (0..len - 1).rev() {
            self.write_bits(0x80 | ((n >> (6 * i)) & 0x3F), 8);
        }
    }

    fn align(&mut self) {
        while self.bits != 0 {
            self.write_bits(0, 1);
        }
    }
}

pub struct FlacStreamWriter {
    sample_rate: u32,
    channels: usize,
    bits_per_sample: u32,
    partition_order: u32,
    escaped_residuals: bool,
    wasted_bits: u32,
    frame_number: u64,
    frames: Vec<u8>,
    total_samples: u64,
    min_block: usize,
    max_block: usize,
    min_frame: usize,
    max_frame: usize,
    extra_blocks: Vec<(u8, Vec<u8>)>,
    declared_total: Option<u64>,
    record_frame_sizes: bool,
}

impl FlacStreamWriter {
    pub fn new(sample_rate: u32, channels: usize, bits_per_sample: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            partition_order: 0,
            escaped_residuals: false,
            wasted_bits: 0,
            frame_number: 0,
            frames: Vec::new(),
            total_samples: 0,
            min_block: usize::MAX,
            max_block: 0,
            min_frame: usize::MAX,
            max_frame: 0,
            extra_blocks: Vec::new(),
            declared_total: None,
            record_frame_sizes: true,
        }
    }

    pub fn with_partition_order(mut self, order: u32) -> Self {
        self.partition_order = order;
        self
    }

    /// Store residuals as raw escaped partitions instead of Rice codes.
    pub fn with_escaped_residuals(mut self, escaped: bool) -> Self {
        self.escaped_residuals = escaped;
        self
    }

    /// Every sample must have its low `bits` bits clear.
    pub fn with_wasted_bits(mut self, bits: u32) -> Self {
        self.wasted_bits = bits;
        self
    }

    /// Overrides STREAMINFO's total sample count.
    pub fn with_declared_total(mut self, total: u64) -> Self {
        self.declared_total = Some(total);
        self
    }

    /// Leaves STREAMINFO's min/max frame size at zero ("unknown").
    pub fn without_frame_sizes(mut self) -> Self {
        self.record_frame_sizes = false;
        self
    }

    /// Adds a metadata block (1 = padding, 4 = vorbis comment, ...) after STREAMINFO.
    pub fn add_metadata_block(&mut self, block_type: u8, payload: Vec<u8>) {
        self.extra_blocks.push((block_type, payload));
    }

    /// Encodes one frame from per-channel samples and appends it to the stream.
    pub fn add_frame(&mut self, channels: &[Vec<i32>], subframe: &Subframe, stereo: Stereo) {
        let frame = self.encode_frame(channels, subframe, stereo);
        let block = channels[0].len();
        self.total_samples += block as u64;
        self.min_block = self.min_block.min(block);
        self.max_block = self.max_block.max(block);
        self.min_frame = self.min_frame.min(frame.len());
        self.max_frame = self.max_frame.max(frame.len());
        self.frames.extend_from_slice(&frame);
    }

    /// Splits interleaved samples into `block_size` frames.
    pub fn add_interleaved(
        &mut self,
        samples: &[i32],
        block_size: usize,
        subframe: &Subframe,
        stereo: Stereo,
    ) {
        for block in samples.chunks(block_size * self.channels) {
            let frames = block.len() / self.channels;
            let split: Vec<Vec<i32>> = (0..self.channels)
                .map(|c| (0..frames).map(|f| block[f * self.channels + c]).collect())
                .collect();
            self.add_frame(&split, subframe, stereo);
        }
    }

    /// Encodes a single frame without adding it to the stream.
    pub fn encode_frame(
        &mut self,
        channels: &[Vec<i32>],
        subframe: &Subframe,
        stereo: Stereo,
    ) -> Vec<u8> {
        assert_eq!(channels.len(), self.channels);
        let block = channels[0].len();
        assert!(block > 0 && block <= 65_536);
        if stereo != Stereo::Independent {
            assert_eq!(self.channels, 2);
        }

        let mut w = BitWriter::default();
        w.write_bits(0x3FFE, 14);
        w.write_bits(0, 1);
        w.write_bits(0, 1);
        w.write_bits(7, 4);
        w.write_bits(0, 4);
        let assignment = match stereo {
            Stereo::Independent => self.channels as u64 - 1,
            Stereo::LeftSide => 8,
            Stereo::RightSide => 9,
            Stereo::MidSide => 10,
        };
        w.write_bits(assignment, 4);
        let size_code = match self.bits_per_sample {
            8 => 1,
            12 => 2,
            16 => 4,
            20 => 5,
            24 => 6,
            32 => 7,
            _ => 0,
        };
        w.write_bits(size_code, 3);
        w.write_bits(0, 1);
        w.write_coded_number(self.frame_number);
        w.write_bits(block as u64 - 1, 16);
        let header_crc = crc8(&w.bytes);
        w.write_bits(header_crc as u64, 8);
        self.frame_number += 1;

        let widened: Vec<Vec<i64>> = channels
            .iter()
            .map(|c| c.iter().map(|&s| s as i64).collect())
            .collect();
        let coded: Vec<(Vec<i64>, u32)> = match stereo {
            Stereo::Independent => widened
                .into_iter()
                .map(|c| (c, self.bits_per_sample))
                .collect(),
            _ => {
                let (left, right) = (&widened[0], &widened[1]);
                let side: Vec<i64> = left.iter().zip(right).map(|(l, r)| l - r).collect();
                let bps = self.bits_per_sample;
                match stereo {
                    Stereo::LeftSide => vec![(left.clone(), bps), (side, bps + 1)],
                    Stereo::RightSide => vec![(side, bps + 1), (right.clone(), bps)],
                    _ => {
                        let mid = left.iter().zip(right).map(|(l, r)| (l + r) >> 1).collect();
                        vec![(mid, bps), (side, bps + 1)]
                    }
                }
            }
        };

        for (samples, bps) in &coded {
            self.write_subframe(&mut w, samples, *bps, subframe);
        }

        w.align();
        let frame_crc = crc16(&w.bytes);
        w.write_bits(frame_crc as u64, 16);
        w.bytes
    }

    fn write_subframe(&self, w: &mut BitWriter, samples: &[i64], bps: u32, subframe: &Subframe) {
        let wasted = match subframe {
            Subframe::Constant => 0,
            _ => self.wasted_bits,
        };
        let kind: u64 = match subframe {
            Subframe::Constant => 0,
            Subframe::Verbatim => 1,
            Subframe::Fixed(order) => 8 + *order as u64,
            Subframe::Lpc { coefficients, .. } => 32 + coefficients.len() as u64 - 1,
        };
        w.write_bits(0, 1);
        w.write_bits(kind, 6);
        if wasted > 0 {
            w.write_bits(1, 1);
            w.write_unary(wasted as u64 - 1);
        } else {
            w.write_bits(0, 1);
        }

        let bps = bps - wasted;
        let samples: Vec<i64> = samples.iter().map(|&s| s >> wasted).collect();

        match subframe {
            Subframe::Constant => w.write_signed(samples[0], bps),
            Subframe::Verbatim => samples.iter().for_each(|&s| w.write_signed(s, bps)),
            Subframe::Fixed(order) => {
                let order = *order;
                samples[..order].iter().for_each(|&s| w.write_signed(s, bps));
                let residual: Vec<i64> = (order..samples.len())
                    .map(|i| samples[i] - fixed_prediction(&samples, i, order))
                    .collect();
                self.write_residual(w, &residual, samples.len(), order);
            }
            Subframe::Lpc {
                coefficients,
                precision,
                shift,
            } => {
                let order = coefficients.len();
                samples[..order].iter().for_each(|&s| w.write_signed(s, bps));
                w.write_bits(*precision as u64 - 1, 4);
                w.write_signed(*shift as i64, 5);
                coefficients
                    .iter()
                    .for_each(|&c| w.write_signed(c as i64, *precision));
                let residual: Vec<i64> = (order..samples.len())
                    .map(|i| {
                        let prediction: i64 = coefficients
                            .iter()
                            .enumerate()
                            .map(|(j, &c)| c as i64 * samples[i - 1 - j])
                            .sum();
                        samples[i] - (prediction >> shift)
                    })
                    .collect();
                self.write_residual(w, &residual, samples.len(), order);
            }
        }
    }

    fn write_residual(&self, w: &mut BitWriter, residual: &[i64], block: usize, order: usize) {
        let partitions = 1usize << self.partition_order;
        let partition_len = block >> self.partition_order;
        assert_eq!(partition_len * partitions, block);

        let mut ranges = Vec::with_capacity(partitions);
        let mut start = 0;
        for p in 0..partitions {
            let count = if p == 0 {
                partition_len - order
            } else {
                partition_len
            };
            ranges.push(start..start + count);
            start += count;
        }

        let params: Vec<u32> = ranges
            .iter()
            .map(|r| rice_parameter(&residual[r.clone()]))
            .collect();
        let rice2 = params.iter().any(|&p| p > 14);
        let (param_bits, escape) = if rice2 { (5, 0x1F) } else { (4, 0x0F) };

        w.write_bits(rice2 as u64, 2);
        w.write_bits(self.partition_order as u64, 4);
        for (range, param) in ranges.into_iter().zip(params) {
            let values = &residual[range];
            if self.escaped_residuals {
                let width = values
                    .iter()
                    .map(|&v| 65 - (v ^ (v >> 63)).leading_zeros())
                    .max()
                    .unwrap_or(0);
                let width = if values.iter().all(|&v| v == 0) { 0 } else { width };
                w.write_bits(escape, param_bits);
                w.write_bits(width as u64, 5);
                values.iter().for_each(|&v| w.write_signed(v, width));
            } else {
                w.write_bits(param as u64, param_bits);
                values.iter().for_each(|&v| w.write_rice(v, param));
            }
        }
    }

    /// Finishes the stream: marker, STREAMINFO, extra blocks, frames.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frames.len() + 64);
        out.extend_from_slice(b"fLaC");

        let last = self.extra_blocks.is_empty();
        out.push(if last { 0x80 } else { 0x00 });
        out.extend_from_slice(&34u32.to_be_bytes()[1..]);

        let (min_block, max_block) = if self.max_block == 0 {
            (4096, 4096)
        } else {
            (self.min_block.max(16), self.max_block.max(16))
        };
        let (min_frame, max_frame) = if self.record_frame_sizes && self.max_frame > 0 {
            (self.min_frame, self.max_frame)
        } else {
            (0, 0)
        };
        out.extend_from_slice(&(min_block as u16).to_be_bytes());
        out.extend_from_slice(&(max_block as u16).to_be_bytes());
        out.extend_from_slice(&(min_frame as u32).to_be_bytes()[1..]);
        out.extend_from_slice(&(max_frame as u32).to_be_bytes()[1..]);
        let total = self.declared_total.unwrap_or(self.total_samples);
        let packed = ((self.sample_rate as u64) << 44)
            | ((self.channels as u64 - 1) << 41)
            | ((self.bits_per_sample as u64 - 1) << 36)
            | (total & 0xF_FFFF_FFFF);
        out.extend_from_slice(&packed.to_be_bytes());
        out.extend_from_slice(&[0u8; 16]);

        for (i, (block_type, payload)) in self.extra_blocks.iter().enumerate() {
            let last = i + 1 == self.extra_blocks.len();
            out.push(block_type | if last { 0x80 } else { 0x00 });
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(payload);
        }

        out.extend_from_slice(&self.frames);
        out
    }
}

fn fixed_prediction(samples: &[i64], i: usize, order: usize) -> i64 {
    match order {
        0 => 0,
        1 => samples[i - 1],
        2 => 2 * samples[i - 1] - samples[i - 2],
        3 => 3 * samples[i - 1] - 3 * samples[i - 2] + samples[i - 3],
        4 => 4 * samples[i - 1] - 6 * samples[i - 2] + 4 * samples[i - 3] - samples[i - 4],
        _ => panic!("fixed predictor order {} out of range", order),
    }
}

/// floor(log2(mean folded value)), capped at the Rice2 maximum.
fn rice_parameter(values: &[i64]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let sum: u128 = values
        .iter()
        .map(|&v| ((v << 1) ^ (v >> 63)) as u64 as u128)
        .sum();
    let mean = (sum / values.len() as u128) as u64;
    if mean == 0 {
        0
    } else {
        (63 - mean.leading_zeros()).min(30)
    }
}

/// Interleaved half-scale sine at `bits` resolution, 440 Hz times the channel
/// number on each channel.
pub fn sine_i32(frames: usize, channels: usize, sample_rate: u32, bits: u32) -> Vec<i32> {
    let amplitude = ((1i64 << (bits - 1)) - 1) as f64 * 0.5;
    let mut out = Vec::with_capacity(frames * channels);
    for n in 0..frames {
        for c in 0..channels {
            let freq = 440.0 * (c + 1) as f64;
            let phase = 2.0 * std::f64::consts::PI * freq * n as f64 / sample_rate as f64;
            out.push((phase.sin() * amplitude) as i32);
        }
    }
    out
}
