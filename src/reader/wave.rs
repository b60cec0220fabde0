use super::DecodeBuffer;
use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read};
use vac_core::audio_bytes::{normalize_s24le, normalize_u8};
use vac_core::wav::WavDataReader;

/// Reads unsigned 8-bit samples into the buffer tail and widens them forward
/// to signed 16-bit. Returns the number of bytes read.
pub fn read_u8<R: Read>(
    data: &mut WavDataReader<R>,
    buffer: &mut DecodeBuffer,
    max_samples: usize,
) -> io::Result<usize> {
    let stage = buffer.block_samples();
    let bytes = buffer.bytes_mut();
    let read = data.read_data(&mut bytes[stage..stage + max_samples])?;

    // Sample i lands on [2i, 2i + 2), never past the raw byte at stage + i.
    for i in 0..read {
        let sample = normalize_u8(bytes[stage + i]);
        LittleEndian::write_i16(&mut bytes[2 * i..2 * i + 2], sample);
    }
    Ok(read)
}

/// Reads packed 24-bit triplets into the buffer tail and widens them forward
/// to left-justified 32-bit. Returns `bytes_read / 3`.
pub fn read_s24<R: Read>(
    data: &mut WavDataReader<R>,
    buffer: &mut DecodeBuffer,
    max_samples: usize,
) -> io::Result<usize> {
    let stage = buffer.block_samples();
    let bytes = buffer.bytes_mut();
    let read = data.read_data(&mut bytes[stage..stage + 3 * max_samples])?;

    let samples = read / 3;
    for i in 0..samples {
        let at = stage + 3 * i;
        let triplet = [bytes[at], bytes[at + 1], bytes[at + 2]];
        LittleEndian::write_i32(&mut bytes[4 * i..4 * i + 4], normalize_s24le(triplet));
    }
    Ok(samples)
}

/// Copies samples verbatim. Returns `bytes_read >> shift`.
pub fn read_direct<R: Read>(
    data: &mut WavDataReader<R>,
    shift: u32,
    buffer: &mut DecodeBuffer,
    max_samples: usize,
) -> io::Result<usize> {
    let want = max_samples << shift;
    let read = data.read_data(&mut buffer.bytes_mut()[..want])?;
    Ok(read >> shift)
}
