//! Ogg Opus file writer over libopus.

pub mod mapping;
pub mod packet;
pub mod settings;

pub use mapping::ChannelMapping;
pub use settings::{BitrateMode, EncoderSettings, ResolvedSettings};

use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use opus::{Application, Bitrate, Channels};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use vac_core::{Encoder, Result, VacError, TARGET_SAMPLE_RATE};

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const FRAME_SAMPLES: usize = 960;

const MAX_PACKET_LEN: usize = 4000;
const ENCODER_TAG: &str = "encoder=vac-enc";

/// libopus version string, e.g. `libopus 1.4`.
pub fn library_version() -> &'static str {
    opus::version()
}

fn encode_error(e: opus::Error) -> VacError {
    VacError::Encode(e.to_string())
}

pub struct OggOpusEncoder<W: Write> {
    writer: PacketWriter<'static, W>,
    serial: u32,
    mapping: ChannelMapping,
    streams: Vec<opus::Encoder>,
    stream_input: Vec<Vec<f32>>,
    pending: Vec<f32>,
    held: Option<Vec<u8>>,
    pre_skip: u16,
    input_frames: u64,
    packets: u64,
    finished: bool,
}

impl<W: Write> OggOpusEncoder<W> {
    /// Writes the OpusHead and OpusTags pages immediately.
    ///
    /// `input_rate` is recorded in OpusHead for players; audio handed to
    /// `write_float` must already be at 48 kHz.
    pub fn new(
        writer: W,
        channels: u16,
        input_rate: u32,
        settings: &ResolvedSettings,
    ) -> Result<Self> {
        let mapping = ChannelMapping::for_channels(channels)?;
        let bitrates = mapping.stream_bitrates(settings.bitrate);

        let mut streams = Vec::with_capacity(mapping.streams as usize);
        for (index, &bitrate) in bitrates.iter().enumerate() {
            let layout = if mapping.stream_channels(index) == 2 {
                Channels::Stereo
            } else {
                Channels::Mono
            };
            let mut encoder = opus::Encoder::new(TARGET_SAMPLE_RATE, layout, Application::Audio)
                .map_err(encode_error)?;
            encoder
                .set_bitrate(Bitrate::Bits(bitrate as i32))
                .map_err(encode_error)?;
            let (vbr, constrained) = match settings.mode {
                BitrateMode::Cbr => (false, false),
                BitrateMode::Cvbr => (true, true),
                BitrateMode::Vbr => (true, false),
            };
            encoder.set_vbr(vbr).map_err(encode_error)?;
            encoder
                .set_vbr_constraint(constrained)
                .map_err(encode_error)?;
            streams.push(encoder);
        }

        let lookahead = match streams.first_mut() {
            Some(encoder) => encoder.get_lookahead().map_err(encode_error)?,
            None => 0,
        };
        let pre_skip = u16::try_from(lookahead)
            .map_err(|_| VacError::Encode(format!("encoder lookahead {} out of range", lookahead)))?;

        debug!(
            channels,
            family = mapping.family,
            streams = mapping.streams,
            coupled = mapping.coupled,
            bitrate = settings.bitrate,
            mode = settings.mode.label(),
            lsb_depth = settings.lsb_depth,
            pre_skip,
            "opened Opus encoder"
        );

        let stream_input = (0..mapping.streams as usize)
            .map(|s| Vec::with_capacity(FRAME_SAMPLES * mapping.stream_channels(s)))
            .collect();

        let mut encoder = Self {
            writer: PacketWriter::new(writer),
            serial: stream_serial(),
            mapping,
            streams,
            stream_input,
            pending: Vec::with_capacity(FRAME_SAMPLES * channels as usize),
            held: None,
            pre_skip,
            input_frames: 0,
            packets: 0,
            finished: false,
        };
        encoder.write_headers(input_rate)?;
        Ok(encoder)
    }

    pub fn pre_skip(&self) -> u16 {
        self.pre_skip
    }

    pub fn mapping(&self) -> &ChannelMapping {
        &self.mapping
    }

    /// 48 kHz frames accepted so far.
    pub fn input_frames(&self) -> u64 {
        self.input_frames
    }

    /// Audio packets produced so far, including one still held back.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_headers(&mut self, input_rate: u32) -> Result<()> {
        let mut head = Vec::with_capacity(19 + self.mapping.channels());
        head.extend_from_slice(b"OpusHead");
        head.push(1);
        head.push(self.mapping.channels() as u8);
        head.extend_from_slice(&self.pre_skip.to_le_bytes());
        head.extend_from_slice(&input_rate.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes());
        head.push(self.mapping.family);
        if self.mapping.family != 0 {
            head.push(self.mapping.streams);
            head.push(self.mapping.coupled);
            head.extend_from_slice(&self.mapping.table);
        }

        let vendor = library_version().as_bytes();
        let mut tags = Vec::with_capacity(24 + vendor.len() + ENCODER_TAG.len());
        tags.extend_from_slice(b"OpusTags");
        tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        tags.extend_from_slice(vendor);
        tags.extend_from_slice(&1u32.to_le_bytes());
        tags.extend_from_slice(&(ENCODER_TAG.len() as u32).to_le_bytes());
        tags.extend_from_slice(ENCODER_TAG.as_bytes());

        self.writer
            .write_packet(head, self.serial, PacketWriteEndInfo::EndPage, 0)?;
        self.writer
            .write_packet(tags, self.serial, PacketWriteEndInfo::EndPage, 0)?;
        Ok(())
    }

    /// Encodes one full interleaved frame from `frame`.
    fn encode_frame(&mut self, frame: &[f32]) -> Result<()> {
        let channels = self.mapping.channels();
        let packet = if self.streams.len() == 1 {
            let mut out = vec![0u8; MAX_PACKET_LEN];
            let len = self.streams[0]
                .encode_float(frame, &mut out)
                .map_err(encode_error)?;
            out.truncate(len);
            out
        } else {
            for input in self.stream_input.iter_mut() {
                input.clear();
            }
            for samples in frame.chunks_exact(channels) {
                // Route each channel into its stream, stereo streams interleaved.
                for slot in 0..2 {
                    for (channel, &sample) in samples.iter().enumerate() {
                        let (stream, position) = self.mapping.locate(channel);
                        if position == slot {
                            self.stream_input[stream].push(sample);
                        }
                    }
                }
            }

            let mut parts = Vec::with_capacity(self.streams.len());
            for (encoder, input) in self.streams.iter_mut().zip(&self.stream_input) {
                let mut out = vec![0u8; MAX_PACKET_LEN];
                let len = encoder.encode_float(input, &mut out).map_err(encode_error)?;
                out.truncate(len);
                parts.push(out);
            }
            packet::join_streams(&parts)?
        };

        // The previous packet is only written now, so the final one can carry
        // the end-of-stream flag.
        if let Some(previous) = self.held.replace(packet) {
            let granule = self.packets * FRAME_SAMPLES as u64;
            self.writer.write_packet(
                previous,
                self.serial,
                PacketWriteEndInfo::NormalPacket,
                granule,
            )?;
        }
        self.packets += 1;
        Ok(())
    }
}

impl<W: Write> Encoder for OggOpusEncoder<W> {
    fn write_float(&mut self, samples: &[f32]) -> Result<()> {
        if self.finished {
            return Err(VacError::Encode("write after drain".to_string()));
        }
        let channels = self.mapping.channels();
        if samples.len() % channels != 0 {
            return Err(VacError::Encode(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        self.input_frames += (samples.len() / channels) as u64;

        let frame_len = FRAME_SAMPLES * channels;
        let mut rest = samples;
        if !self.pending.is_empty() {
            let take = (frame_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() < frame_len {
                return Ok(());
            }
            let frame = std::mem::take(&mut self.pending);
            self.encode_frame(&frame)?;
            self.pending = frame;
            self.pending.clear();
        }

        let mut chunks = rest.chunks_exact(frame_len);
        for frame in chunks.by_ref() {
            self.encode_frame(frame)?;
        }
        self.pending.extend_from_slice(chunks.remainder());
        Ok(())
    }

    /// Pads with silence until the encoder delay is flushed, then closes the
    /// stream with the exact end granule.
    fn drain(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let channels = self.mapping.channels();
        let frame_len = FRAME_SAMPLES * channels;
        let end_granule = self.pre_skip as u64 + self.input_frames;

        let mut frame = std::mem::take(&mut self.pending);
        if !frame.is_empty() {
            frame.resize(frame_len, 0.0);
            self.encode_frame(&frame)?;
        }
        frame.clear();
        frame.resize(frame_len, 0.0);
        while self.packets * (FRAME_SAMPLES as u64) < end_granule {
            self.encode_frame(&frame)?;
        }

        match self.held.take() {
            Some(last) => {
                self.writer.write_packet(
                    last,
                    self.serial,
                    PacketWriteEndInfo::EndStream,
                    end_granule,
                )?;
            }
            None => {
                // Header-only stream: an empty page still marks the end.
                self.writer.write_packet(
                    Vec::new(),
                    self.serial,
                    PacketWriteEndInfo::EndStream,
                    0,
                )?;
            }
        }
        self.writer.inner_mut().flush()?;
        self.finished = true;

        debug!(
            packets = self.packets,
            input_frames = self.input_frames,
            end_granule,
            "closed Ogg Opus stream"
        );
        Ok(())
    }
}

fn stream_serial() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() ^ d.as_secs() as u32)
        .unwrap_or(0x5641_4345)
}
