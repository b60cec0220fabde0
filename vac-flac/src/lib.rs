//! Push-style FLAC decoder.
//!
//! The caller owns the input buffer. Each [`FlacDecoder::process`] call is
//! handed a window of undecoded bytes, consumes a prefix of it (whole metadata
//! blocks or whole frames only) and writes interleaved samples left-justified
//! into 32-bit containers.

mod bitstream;
mod frame;
pub mod metadata;
pub mod test_utils;

pub use metadata::StreamInfo;

use metadata::{BlockHeader, BlockType, BLOCK_HEADER_LEN, STREAMINFO_LEN};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum FlacError {
    #[error("stream does not start with the fLaC marker")]
    NotFlac,

    #[error("bad metadata: {0}")]
    BadMetadata(String),

    #[error("lost frame sync")]
    LostSync,

    #[error("reserved value in {0}")]
    Reserved(&'static str),

    #[error("frame header CRC mismatch: expected {expected:#04x}, computed {actual:#04x}")]
    HeaderCrcMismatch { expected: u8, actual: u8 },

    #[error("frame CRC mismatch: expected {expected:#06x}, computed {actual:#06x}")]
    FrameCrcMismatch { expected: u16, actual: u16 },

    #[error("bad frame: {0}")]
    BadFrame(String),

    /// Internal signal that more input is needed; `process` never returns it.
    #[error("unexpected end of data")]
    UnexpectedEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Magic,
    BlockHeader,
    StreamInfo { is_last: bool },
    SkipBlock { remaining: usize, is_last: bool },
    Frames,
    Done,
}

pub struct FlacDecoder {
    state: State,
    stream_info: Option<StreamInfo>,
    channels: Vec<Vec<i64>>,
    pending: Vec<i32>,
    pending_pos: usize,
    decoded: u64,
}

impl Default for FlacDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlacDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Magic,
            stream_info: None,
            channels: Vec::new(),
            pending: Vec::new(),
            pending_pos: 0,
            decoded: 0,
        }
    }

    /// Back to the initial state so the stream can be replayed from byte 0.
    pub fn reset(&mut self) {
        self.state = State::Magic;
        self.stream_info = None;
        self.pending.clear();
        self.pending_pos = 0;
        self.decoded = 0;
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream_info.as_ref()
    }

    /// True once STREAMINFO's sample count has been decoded and handed out.
    pub fn is_finished(&self) -> bool {
        self.state == State::Done && self.pending_len() == 0
    }

    /// Inter-channel samples decoded so far.
    pub fn decoded_samples(&self) -> u64 {
        self.decoded
    }

    /// Decodes as much of `input` as possible into `output`.
    ///
    /// Returns `(bytes_consumed, samples_written)`. Bytes are only consumed in
    /// whole units, so an incomplete frame at the end of `input` is left for
    /// the next call. Samples that do not fit in `output` are held and handed
    /// out first on the next call. `(0, 0)` means no progress is possible
    /// without more input or more output space.
    pub fn process(
        &mut self,
        input: &[u8],
        output: &mut [i32],
    ) -> Result<(usize, usize), FlacError> {
        let mut consumed = 0;
        let mut written = self.drain_pending(output);

        loop {
            let available = &input[consumed..];
            match self.state {
                State::Magic => {
                    if available.len() < 4 {
                        break;
                    }
                    if &available[..4] != b"fLaC" {
                        return Err(FlacError::NotFlac);
                    }
                    consumed += 4;
                    self.state = State::BlockHeader;
                }
                State::BlockHeader => {
                    let Some(bytes) = available.first_chunk::<BLOCK_HEADER_LEN>() else {
                        break;
                    };
                    let header = BlockHeader::parse(bytes)?;
                    consumed += BLOCK_HEADER_LEN;
                    self.state = self.after_block_header(header)?;
                }
                State::StreamInfo { is_last } => {
                    let Some(bytes) = available.first_chunk::<STREAMINFO_LEN>() else {
                        break;
                    };
                    let info = StreamInfo::parse(bytes)?;
                    debug!(
                        sample_rate = info.sample_rate,
                        channels = info.channels,
                        bits_per_sample = info.bits_per_sample,
                        total_samples = info.total_samples,
                        max_frame_size = info.max_frame_size,
                        "parsed FLAC STREAMINFO"
                    );
                    self.stream_info = Some(info);
                    consumed += STREAMINFO_LEN;
                    self.state = next_after_metadata(is_last);
                }
                State::SkipBlock { remaining, is_last } => {
                    let take = remaining.min(available.len());
                    consumed += take;
                    if take < remaining {
                        self.state = State::SkipBlock {
                            remaining: remaining - take,
                            is_last,
                        };
                        break;
                    }
                    self.state = next_after_metadata(is_last);
                }
                State::Frames => {
                    if self.pending_len() > 0 || written == output.len() {
                        break;
                    }
                    let Some(info) = self.stream_info.as_ref() else {
                        return Err(FlacError::BadMetadata("no STREAMINFO block".to_string()));
                    };
                    let Some(frame) = frame::decode_frame(available, info, &mut self.channels)?
                    else {
                        break;
                    };
                    consumed += frame.bytes;
                    self.queue_frame(frame.block_size);
                    written += self.drain_pending(&mut output[written..]);
                }
                State::Done => {
                    consumed = input.len();
                    break;
                }
            }
        }

        Ok((consumed, written))
    }

    fn after_block_header(&self, header: BlockHeader) -> Result<State, FlacError> {
        match (header.block_type, self.stream_info.is_some()) {
            (BlockType::StreamInfo, false) => {
                if header.length != STREAMINFO_LEN {
                    return Err(FlacError::BadMetadata(format!(
                        "STREAMINFO length {} is not {}",
                        header.length, STREAMINFO_LEN
                    )));
                }
                Ok(State::StreamInfo {
                    is_last: header.is_last,
                })
            }
            (BlockType::StreamInfo, true) => Err(FlacError::BadMetadata(
                "duplicate STREAMINFO block".to_string(),
            )),
            (_, false) => Err(FlacError::BadMetadata(
                "first metadata block is not STREAMINFO".to_string(),
            )),
            (block_type, true) => {
                trace!(?block_type, length = header.length, "skipping metadata block");
                Ok(State::SkipBlock {
                    remaining: header.length,
                    is_last: header.is_last,
                })
            }
        }
    }

    /// Interleaves the decoded channels, left-justifies them and clamps to the
    /// declared total.
    fn queue_frame(&mut self, block_size: usize) {
        let Some(info) = self.stream_info.as_ref() else {
            return;
        };
        let shift = 32 - info.bits_per_sample as u32;
        let keep = if info.total_samples > 0 {
            (info.total_samples.saturating_sub(self.decoded)).min(block_size as u64) as usize
        } else {
            block_size
        };

        self.pending.clear();
        self.pending_pos = 0;
        self.pending.reserve(keep * self.channels.len());
        for i in 0..keep {
            for channel in &self.channels {
                self.pending.push((channel[i] << shift) as i32);
            }
        }

        self.decoded += keep as u64;
        if info.total_samples > 0 && self.decoded >= info.total_samples {
            debug!(decoded = self.decoded, "FLAC stream complete");
            self.state = State::Done;
        }
    }

    fn pending_len(&self) -> usize {
        self.pending.len() - self.pending_pos
    }

    fn drain_pending(&mut self, output: &mut [i32]) -> usize {
        let count = self.pending_len().min(output.len());
        output[..count].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + count]);
        self.pending_pos += count;
        count
    }
}

fn next_after_metadata(is_last: bool) -> State {
    if is_last {
        State::Frames
    } else {
        State::BlockHeader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{sine_i32, FlacStreamWriter, Stereo, Subframe};

    fn stream(frames: usize, block: usize) -> (Vec<u8>, Vec<i32>) {
        let samples = sine_i32(frames, 2, 44_100, 16);
        let mut writer = FlacStreamWriter::new(44_100, 2, 16);
        writer.add_metadata_block(4, b"vendor-ish comment payload".to_vec());
        writer.add_metadata_block(1, vec![0; 300]);
        writer.add_interleaved(&samples, block, &Subframe::Fixed(2), Stereo::MidSide);
        (writer.finish(), samples)
    }

    /// Feeds `bytes` in `step`-sized pieces, keeping the unconsumed residue.
    fn decode_stepwise(bytes: &[u8], step: usize, out_len: usize) -> Vec<i32> {
        let mut decoder = FlacDecoder::new();
        let mut window = Vec::new();
        let mut fed = 0;
        let mut out = vec![0i32; out_len];
        let mut samples = Vec::new();
        loop {
            let (consumed, written) = decoder.process(&window, &mut out).unwrap();
            window.drain(..consumed);
            samples.extend_from_slice(&out[..written]);
            if consumed == 0 && written == 0 {
                if fed == bytes.len() {
                    break;
                }
                let end = (fed + step).min(bytes.len());
                window.extend_from_slice(&bytes[fed..end]);
                fed = end;
            }
        }
        samples
    }

    #[test]
    fn test_decodes_whole_stream() {
        let (bytes, expected) = stream(1_000, 256);
        let samples = decode_stepwise(&bytes, bytes.len(), 1 << 16);
        let expected: Vec<i32> = expected.iter().map(|s| s << 16).collect();
        assert_eq!(samples, expected);
    }

    #[test]
    fn test_input_granularity_does_not_matter() {
        let (bytes, _) = stream(700, 192);
        let whole = decode_stepwise(&bytes, bytes.len(), 4096);
        assert_eq!(decode_stepwise(&bytes, 1, 4096), whole);
        assert_eq!(decode_stepwise(&bytes, 17, 4096), whole);
    }

    #[test]
    fn test_small_output_holds_back_samples() {
        let (bytes, _) = stream(500, 128);
        let whole = decode_stepwise(&bytes, bytes.len(), 4096);
        assert_eq!(decode_stepwise(&bytes, 64, 7), whole);
        assert_eq!(whole.len(), 1_000);
    }

    #[test]
    fn test_stream_info_and_reset() {
        let (bytes, _) = stream(300, 100);
        let mut decoder = FlacDecoder::new();
        let (consumed, written) = decoder.process(&bytes[..128], &mut []).unwrap();
        assert_eq!(written, 0);
        // Metadata is consumed in whole blocks, except padding which is
        // skipped as far as the input reaches.
        assert_eq!(consumed, 128);
        let info = decoder.stream_info().unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(info.total_samples, 300);

        decoder.reset();
        assert!(decoder.stream_info().is_none());
        let mut out = vec![0i32; 600];
        let (consumed, written) = decoder.process(&bytes, &mut out).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(written, 600);
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_trailing_bytes_after_total_are_ignored() {
        let (mut bytes, _) = stream(300, 100);
        let clean_len = bytes.len();
        bytes.extend_from_slice(b"TAGsome id3v1 trailer");
        let mut decoder = FlacDecoder::new();
        let mut out = vec![0i32; 1_000];
        let (consumed, written) = decoder.process(&bytes, &mut out).unwrap();
        assert_eq!(written, 600);
        assert_eq!(consumed, bytes.len());
        assert!(consumed > clean_len);
    }

    #[test]
    fn test_declared_total_clamps_output() {
        let samples = sine_i32(256, 1, 8_000, 24);
        let mut writer = FlacStreamWriter::new(8_000, 1, 24).with_declared_total(200);
        writer.add_interleaved(&samples, 128, &Subframe::Verbatim, Stereo::Independent);
        let bytes = writer.finish();

        let mut decoder = FlacDecoder::new();
        let mut out = vec![0i32; 512];
        let (_, written) = decoder.process(&bytes, &mut out).unwrap();
        assert_eq!(written, 200);
        assert_eq!(out[199], samples[199] << 8);
        assert_eq!(decoder.decoded_samples(), 200);
    }

    #[test]
    fn test_not_flac() {
        let mut decoder = FlacDecoder::new();
        assert!(matches!(
            decoder.process(b"RIFF\0\0\0\0WAVE", &mut []),
            Err(FlacError::NotFlac)
        ));
        let mut decoder = FlacDecoder::new();
        assert_eq!(decoder.process(b"fL", &mut []).unwrap(), (0, 0));
    }

    #[test]
    fn test_first_block_must_be_streaminfo() {
        let mut bytes = b"fLaC".to_vec();
        bytes.extend_from_slice(&[0x81, 0, 0, 4, 0, 0, 0, 0]);
        let mut decoder = FlacDecoder::new();
        assert!(matches!(
            decoder.process(&bytes, &mut []),
            Err(FlacError::BadMetadata(_))
        ));
    }

    #[test]
    fn test_corrupt_frame_is_an_error() {
        let (mut bytes, _) = stream(300, 100);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut decoder = FlacDecoder::new();
        let mut out = vec![0i32; 1_000];
        assert!(matches!(
            decoder.process(&bytes, &mut out),
            Err(FlacError::FrameCrcMismatch { .. })
        ));
    }
}
