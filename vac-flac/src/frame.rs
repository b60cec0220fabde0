use crate::bitstream::{crc16, crc8, BitReader};
use crate::metadata::StreamInfo;
use crate::FlacError;

const FIXED_MAX_ORDER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelAssignment {
    Independent(usize),
    LeftSide,
    RightSide,
    MidSide,
}

impl ChannelAssignment {
    fn channel_count(&self) -> usize {
        match self {
            ChannelAssignment::Independent(n) => *n,
            _ => 2,
        }
    }

    fn is_side(&self, channel: usize) -> bool {
        matches!(
            (self, channel),
            (ChannelAssignment::LeftSide, 1)
                | (ChannelAssignment::RightSide, 0)
                | (ChannelAssignment::MidSide, 1)
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub block_size: usize,
    pub channels: ChannelAssignment,
    pub bits_per_sample: u32,
}

/// A decoded frame: its encoded length and the number of inter-channel
/// samples now held in the per-channel buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DecodedFrame {
    pub bytes: usize,
    pub block_size: usize,
}

/// Decodes the frame at the start of `data` into `channels`.
///
/// Returns `Ok(None)` when `data` ends before the frame does; nothing is
/// consumed and the caller retries with more bytes.
pub(crate) fn decode_frame(
    data: &[u8],
    info: &StreamInfo,
    channels: &mut Vec<Vec<i64>>,
) -> Result<Option<DecodedFrame>, FlacError> {
    match decode_frame_inner(data, info, channels) {
        Ok(frame) => Ok(Some(frame)),
        Err(FlacError::UnexpectedEof) => Ok(None),
        Err(e) => Err(e),
    }
}

fn decode_frame_inner(
    data: &[u8],
    info: &StreamInfo,
    channels: &mut Vec<Vec<i64>>,
) -> Result<DecodedFrame, FlacError> {
    let mut reader = BitReader::new(data);
    let header = read_header(&mut reader, data, info)?;

    let channel_count = header.channels.channel_count();
    channels.resize_with(channel_count, Vec::new);
    for (index, samples) in channels.iter_mut().enumerate() {
        let bps = header.bits_per_sample + header.channels.is_side(index) as u32;
        samples.clear();
        decode_subframe(&mut reader, header.block_size, bps, samples)?;
    }

    reader.align();
    let frame_len = reader.byte_pos();
    let expected = reader.read_bits(16)? as u16;
    let actual = crc16(&data[..frame_len]);
    if expected != actual {
        return Err(FlacError::FrameCrcMismatch { expected, actual });
    }

    decorrelate(header.channels, channels);

    Ok(DecodedFrame {
        bytes: frame_len + 2,
        block_size: header.block_size,
    })
}

fn read_header(
    reader: &mut BitReader,
    data: &[u8],
    info: &StreamInfo,
) -> Result<FrameHeader, FlacError> {
    let sync = reader.read_bits(14)?;
    if sync != 0x3FFE {
        return Err(FlacError::LostSync);
    }
    if reader.read_bit()? {
        return Err(FlacError::Reserved("frame header bit"));
    }
    // Blocking strategy only changes the meaning of the coded number.
    let _variable_blocksize = reader.read_bit()?;

    let block_size_code = reader.read_bits(4)? as u8;
    let sample_rate_code = reader.read_bits(4)? as u8;
    let channels = match reader.read_bits(4)? {
        n @ 0..=7 => ChannelAssignment::Independent(n as usize + 1),
        8 => ChannelAssignment::LeftSide,
        9 => ChannelAssignment::RightSide,
        10 => ChannelAssignment::MidSide,
        _ => return Err(FlacError::Reserved("channel assignment")),
    };
    let bits_per_sample = match reader.read_bits(3)? {
        0 => info.bits_per_sample as u32,
        1 => 8,
        2 => 12,
        4 => 16,
        5 => 20,
        6 => 24,
        7 => 32,
        _ => return Err(FlacError::Reserved("sample size")),
    };
    if reader.read_bit()? {
        return Err(FlacError::Reserved("frame header bit"));
    }

    let _coded_number = reader.read_coded_number()?;

    let block_size = match block_size_code {
        0 => return Err(FlacError::Reserved("block size")),
        1 => 192,
        2..=5 => 576 << (block_size_code - 2),
        6 => reader.read_bits(8)? as usize + 1,
        7 => reader.read_bits(16)? as usize + 1,
        _ => 256 << (block_size_code - 8),
    };

    match sample_rate_code {
        12 => {
            reader.read_bits(8)?;
        }
        13 | 14 => {
            reader.read_bits(16)?;
        }
        15 => return Err(FlacError::Reserved("sample rate")),
        _ => {}
    }

    let header_len = reader.byte_pos();
    let expected = reader.read_bits(8)? as u8;
    let actual = crc8(&data[..header_len]);
    if expected != actual {
        return Err(FlacError::HeaderCrcMismatch { expected, actual });
    }

    if channels.channel_count() != info.channels as usize {
        return Err(FlacError::BadFrame(format!(
            "frame has {} channels, stream has {}",
            channels.channel_count(),
            info.channels
        )));
    }
    if bits_per_sample != info.bits_per_sample as u32 {
        return Err(FlacError::BadFrame(format!(
            "frame has {} bits per sample, stream has {}",
            bits_per_sample, info.bits_per_sample
        )));
    }
    if block_size > info.max_block_size as usize {
        return Err(FlacError::BadFrame(format!(
            "block size {} exceeds stream maximum {}",
            block_size, info.max_block_size
        )));
    }

    Ok(FrameHeader {
        block_size,
        channels,
        bits_per_sample,
    })
}

fn decode_subframe(
    reader: &mut BitReader,
    block_size: usize,
    bps: u32,
    out: &mut Vec<i64>,
) -> Result<(), FlacError> {
    if reader.read_bit()? {
        return Err(FlacError::Reserved("subframe padding bit"));
    }
    let kind = reader.read_bits(6)? as u8;
    let wasted = if reader.read_bit()? {
        reader.read_unary()? + 1
    } else {
        0
    };
    if wasted >= bps {
        return Err(FlacError::BadFrame(format!(
            "{} wasted bits in a {}-bit subframe",
            wasted, bps
        )));
    }
    let bps = bps - wasted;

    match kind {
        0 => {
            let value = reader.read_signed(bps)?;
            out.resize(block_size, value);
        }
        1 => {
            for _ in 0..block_size {
                out.push(reader.read_signed(bps)?);
            }
        }
        8..=12 => {
            let order = (kind - 8) as usize;
            decode_fixed(reader, block_size, bps, order, out)?;
        }
        32..=63 => {
            let order = (kind & 0x1F) as usize + 1;
            decode_lpc(reader, block_size, bps, order, out)?;
        }
        _ => return Err(FlacError::Reserved("subframe type")),
    }

    if wasted > 0 {
        for sample in out.iter_mut() {
            *sample <<= wasted;
        }
    }
    Ok(())
}

fn decode_fixed(
    reader: &mut BitReader,
    block_size: usize,
    bps: u32,
    order: usize,
    out: &mut Vec<i64>,
) -> Result<(), FlacError> {
    debug_assert!(order <= FIXED_MAX_ORDER);
    if order > block_size {
        return Err(FlacError::BadFrame(format!(
            "fixed order {} exceeds block size {}",
            order, block_size
        )));
    }
    for _ in 0..order {
        out.push(reader.read_signed(bps)?);
    }
    read_residual(reader, block_size, order, out)?;

    // Wrapping arithmetic: a corrupt frame may diverge, and is then rejected
    // by the frame CRC.
    const COEFFICIENTS: [&[i64]; FIXED_MAX_ORDER + 1] =
        [&[], &[1], &[2, -1], &[3, -3, 1], &[4, -6, 4, -1]];
    let coefficients = COEFFICIENTS[order];
    for i in order..block_size {
        let prediction = predict(coefficients, &out[..i]);
        out[i] = out[i].wrapping_add(prediction);
    }
    Ok(())
}

fn decode_lpc(
    reader: &mut BitReader,
    block_size: usize,
    bps: u32,
    order: usize,
    out: &mut Vec<i64>,
) -> Result<(), FlacError> {
    if order > block_size {
        return Err(FlacError::BadFrame(format!(
            "LPC order {} exceeds block size {}",
            order, block_size
        )));
    }
    for _ in 0..order {
        out.push(reader.read_signed(bps)?);
    }

    let precision = reader.read_bits(4)? as u32 + 1;
    if precision == 16 {
        return Err(FlacError::Reserved("LPC coefficient precision"));
    }
    let shift = reader.read_signed(5)?;
    if shift < 0 {
        return Err(FlacError::BadFrame(format!(
            "negative LPC shift {}",
            shift
        )));
    }
    let mut coefficients = [0i64; 32];
    for coefficient in coefficients.iter_mut().take(order) {
        *coefficient = reader.read_signed(precision)?;
    }

    read_residual(reader, block_size, order, out)?;

    let coefficients = &coefficients[..order];
    for i in order..block_size {
        let prediction = predict(coefficients, &out[..i]);
        out[i] = out[i].wrapping_add(prediction >> shift);
    }
    Ok(())
}

/// `sum(c[j] * history[len - 1 - j])`, wrapping on overflow.
fn predict(coefficients: &[i64], history: &[i64]) -> i64 {
    coefficients
        .iter()
        .zip(history.iter().rev())
        .fold(0i64, |acc, (&c, &s)| acc.wrapping_add(c.wrapping_mul(s)))
}

/// Appends `block_size - order` residuals to `out`.
fn read_residual(
    reader: &mut BitReader,
    block_size: usize,
    order: usize,
    out: &mut Vec<i64>,
) -> Result<(), FlacError> {
    let (param_bits, escape) = match reader.read_bits(2)? {
        0 => (4, 0x0F),
        1 => (5, 0x1F),
        _ => return Err(FlacError::Reserved("residual coding method")),
    };
    let partition_order = reader.read_bits(4)? as u32;
    let partitions = 1usize << partition_order;
    let partition_len = block_size >> partition_order;
    if partition_len << partition_order != block_size || partition_len < order {
        return Err(FlacError::BadFrame(format!(
            "partition order {} does not fit block size {} with predictor order {}",
            partition_order, block_size, order
        )));
    }

    for partition in 0..partitions {
        let count = if partition == 0 {
            partition_len - order
        } else {
            partition_len
        };
        let param = reader.read_bits(param_bits)? as u32;
        if param == escape {
            let width = reader.read_bits(5)? as u32;
            for _ in 0..count {
                out.push(reader.read_signed(width)?);
            }
        } else {
            for _ in 0..count {
                out.push(reader.read_rice(param)?);
            }
        }
    }
    Ok(())
}

fn decorrelate(assignment: ChannelAssignment, channels: &mut [Vec<i64>]) {
    let (first, second) = match channels {
        [first, second] => (first, second),
        _ => return,
    };
    match assignment {
        ChannelAssignment::Independent(_) => {}
        ChannelAssignment::LeftSide => {
            for (left, side) in first.iter().zip(second.iter_mut()) {
                *side = left.wrapping_sub(*side);
            }
        }
        ChannelAssignment::RightSide => {
            for (side, right) in first.iter_mut().zip(second.iter()) {
                *side = side.wrapping_add(*right);
            }
        }
        ChannelAssignment::MidSide => {
            for (mid, side) in first.iter_mut().zip(second.iter_mut()) {
                let sum = (*mid << 1) | (*side & 1);
                let left = sum.wrapping_add(*side) >> 1;
                let right = sum.wrapping_sub(*side) >> 1;
                *mid = left;
                *side = right;
            }
        }
    }
}
