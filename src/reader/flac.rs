use super::DecodeBuffer;
use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read};
use tracing::{debug, trace, warn};
use vac_core::{Result, VacError};
use vac_flac::{FlacDecoder, FlacError, StreamInfo};

/// Minimum window of undecoded bytes kept behind the sample region.
pub const FLAC_BUFFER_EXTENSION: usize = 32_768;

/// Window size that always holds at least one whole frame of this stream.
pub fn window_extension(info: &StreamInfo) -> usize {
    FLAC_BUFFER_EXTENSION.max(info.max_encoded_frame_len())
}

pub(crate) fn corrupt(err: FlacError) -> VacError {
    VacError::CorruptStream(err.to_string())
}

/// Sliding-window driver for the FLAC decoder.
///
/// The decode buffer's extension holds undecoded bytes. Each round tops the
/// window up with one read, hands the whole window to the decoder and moves
/// the unconsumed residue back to the front.
pub struct FlacReader<R> {
    source: R,
    decoder: FlacDecoder,
    extension: usize,
    window_filled: usize,
    window_consumed: usize,
    scratch: Vec<i32>,
    bytes_read: u64,
    bytes_consumed: u64,
    eof: bool,
}

impl<R: Read> FlacReader<R> {
    /// `source` must be positioned at the `fLaC` marker and `decoder` freshly
    /// reset; `block_samples` is the largest request [`FlacReader::read`]
    /// will see.
    pub fn new(
        source: R,
        decoder: FlacDecoder,
        block_samples: usize,
        extension: usize,
    ) -> Result<Self> {
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(block_samples)
            .map_err(|_| VacError::AllocationError(block_samples * 4))?;
        scratch.resize(block_samples, 0);
        debug!(extension, block_samples, "FLAC window ready");

        Ok(Self {
            source,
            decoder,
            extension,
            window_filled: extension,
            window_consumed: extension,
            scratch,
            bytes_read: 0,
            bytes_consumed: 0,
            eof: false,
        })
    }

    /// Undecoded bytes carried to the next call.
    pub fn residue(&self) -> usize {
        self.window_filled - self.window_consumed
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn decoder(&self) -> &FlacDecoder {
        &self.decoder
    }

    /// Decodes up to `max_samples` interleaved samples into the front of
    /// `buffer` as little-endian `i32`.
    pub fn read(&mut self, buffer: &mut DecodeBuffer, max_samples: usize) -> Result<usize> {
        let max_samples = max_samples.min(self.scratch.len());
        let (region, window) = buffer.split_extension();
        if window.len() < self.extension {
            return Err(VacError::InvalidInput(format!(
                "decode buffer extension {} is smaller than the FLAC window {}",
                window.len(),
                self.extension
            )));
        }
        let window = &mut window[..self.extension];

        let mut produced = 0;
        while produced < max_samples {
            let residue = self.residue();
            let fresh = self.extension - residue;
            let read = if self.eof || fresh == 0 {
                0
            } else {
                read_once(&mut self.source, &mut window[residue..residue + fresh])?
            };
            if read == 0 && fresh > 0 {
                self.eof = true;
            }
            self.bytes_read += read as u64;
            let occupied = residue + read;

            let (consumed, written) = self
                .decoder
                .process(&window[..occupied], &mut self.scratch[produced..max_samples])
                .map_err(corrupt)?;
            window.copy_within(consumed..occupied, 0);
            self.window_filled = occupied;
            self.window_consumed = consumed;
            self.bytes_consumed += consumed as u64;
            produced += written;
            trace!(read, occupied, consumed, written, produced, "FLAC window round");

            if consumed == 0 && written == 0 && read == 0 {
                if occupied == self.extension {
                    return Err(VacError::CorruptStream(format!(
                        "FLAC frame does not fit in a {} byte window",
                        self.extension
                    )));
                }
                if self.eof {
                    self.note_end(occupied);
                    break;
                }
            }
        }

        LittleEndian::write_i32_into(&self.scratch[..produced], &mut region[..produced * 4]);
        Ok(produced)
    }

    fn note_end(&self, residue: usize) {
        let expected = self
            .decoder
            .stream_info()
            .map_or(0, |info| info.total_samples);
        if residue > 0 {
            warn!(
                residue,
                decoded = self.decoder.decoded_samples(),
                expected,
                "truncated FLAC stream: incomplete final frame ignored"
            );
        } else if !self.decoder.is_finished() && self.decoder.decoded_samples() < expected {
            warn!(
                decoded = self.decoder.decoded_samples(),
                expected,
                "FLAC stream ended before its declared sample count"
            );
        }
    }
}

/// A single read, retried only when interrupted.
fn read_once<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use vac_flac::test_utils::{sine_i32, FlacStreamWriter, Stereo, Subframe};

    fn flac_bytes(frames: usize, block: usize) -> (Vec<u8>, Vec<i32>) {
        let samples = sine_i32(frames, 2, 44_100, 16);
        let mut writer = FlacStreamWriter::new(44_100, 2, 16);
        writer.add_interleaved(&samples, block, &Subframe::Fixed(2), Stereo::LeftSide);
        (writer.finish(), samples)
    }

    fn open(bytes: Vec<u8>, block_samples: usize) -> (FlacReader<Cursor<Vec<u8>>>, DecodeBuffer) {
        let extension = FLAC_BUFFER_EXTENSION;
        let reader = FlacReader::new(
            Cursor::new(bytes),
            FlacDecoder::new(),
            block_samples,
            extension,
        )
        .unwrap();
        let buffer = DecodeBuffer::new(block_samples, 4, extension).unwrap();
        (reader, buffer)
    }

    fn read_all(reader: &mut FlacReader<Cursor<Vec<u8>>>, buffer: &mut DecodeBuffer) -> Vec<i32> {
        let mut out = Vec::new();
        loop {
            let request = buffer.block_samples();
            let n = reader.read(buffer, request).unwrap();
            assert_eq!(reader.bytes_consumed() + reader.residue() as u64, reader.bytes_read());
            let mut samples = vec![0i32; n];
            LittleEndian::read_i32_into(buffer.samples(n), &mut samples);
            out.extend(samples);
            if n < request {
                return out;
            }
        }
    }

    #[test]
    fn test_reads_whole_stream_in_blocks() {
        let (bytes, expected) = flac_bytes(5_000, 1_024);
        let len = bytes.len() as u64;
        let (mut reader, mut buffer) = open(bytes, 1_000);

        let samples = read_all(&mut reader, &mut buffer);
        let expected: Vec<i32> = expected.iter().map(|s| s << 16).collect();
        assert_eq!(samples, expected);
        assert_eq!(reader.bytes_consumed(), len);
        assert_eq!(reader.residue(), 0);
        assert!(reader.decoder().is_finished());
    }

    #[test]
    fn test_truncated_tail_is_end_of_stream() {
        let (mut bytes, _) = flac_bytes(4_096, 1_024);
        bytes.truncate(bytes.len() - 10);
        let (mut reader, mut buffer) = open(bytes, 4_096);

        let samples = read_all(&mut reader, &mut buffer);
        assert_eq!(samples.len(), 3 * 1_024 * 2);
        assert!(reader.residue() > 0);
    }

    #[test]
    fn test_oversized_frame_is_corrupt() {
        let (bytes, _) = flac_bytes(4_096, 4_096);
        // A 4096-frame stereo block needs far more than 1 KiB.
        let mut reader =
            FlacReader::new(Cursor::new(bytes), FlacDecoder::new(), 8_192, 1_024).unwrap();
        let mut buffer = DecodeBuffer::new(8_192, 4, 1_024).unwrap();
        assert!(matches!(
            reader.read(&mut buffer, 8_192),
            Err(VacError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_bad_crc_is_corrupt() {
        let (mut bytes, _) = flac_bytes(2_048, 1_024);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let (mut reader, mut buffer) = open(bytes, 8_192);
        assert!(matches!(
            reader.read(&mut buffer, 8_192),
            Err(VacError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_window_extension_tracks_streaminfo() {
        let info = StreamInfo {
            min_block_size: 4_096,
            max_block_size: 65_535,
            min_frame_size: 0,
            max_frame_size: 0,
            sample_rate: 96_000,
            channels: 8,
            bits_per_sample: 32,
            total_samples: 1,
            md5: [0; 16],
        };
        assert!(window_extension(&info) > FLAC_BUFFER_EXTENSION);
        assert_eq!(window_extension(&info), info.max_encoded_frame_len());

        let small = StreamInfo {
            max_block_size: 16,
            channels: 1,
            bits_per_sample: 8,
            ..info
        };
        assert_eq!(window_extension(&small), FLAC_BUFFER_EXTENSION);
    }
}
