//! Container detection and source setup.

use crate::reader::flac::{corrupt, window_extension, FlacReader};
use crate::reader::{DecodeBuffer, SampleReader};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;
use vac_core::wav::{read_full, WavDataReader, WavHeader};
use vac_core::{
    try_alloc_bytes, ContainerKind, EncodingFlag, Result, StreamDescriptor, VacError,
};
use vac_flac::{FlacDecoder, FlacError, StreamInfo};

/// First chunk fed to the FLAC decoder while looking for STREAMINFO.
pub const FLAC_PROBE_BYTES: usize = 128;

/// An opened stream: what it is, how to read it and where samples land.
pub struct AudioSource<R> {
    descriptor: StreamDescriptor,
    reader: SampleReader<R>,
    buffer: DecodeBuffer,
}

impl<R: Read> AudioSource<R> {
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn reader(&self) -> &SampleReader<R> {
        &self.reader
    }

    pub fn buffer(&self) -> &DecodeBuffer {
        &self.buffer
    }

    /// Reads up to `max_samples` interleaved samples, returning the count.
    pub fn read_block(&mut self, max_samples: usize) -> Result<usize> {
        self.reader.read(&mut self.buffer, max_samples)
    }

    /// The first `count` samples of the last block, in the descriptor's
    /// sample format.
    pub fn samples(&self, count: usize) -> &[u8] {
        self.buffer.samples(count)
    }
}

pub fn open_file<P: AsRef<Path>>(path: P) -> Result<AudioSource<BufReader<File>>> {
    let file = File::open(path.as_ref())?;
    probe(BufReader::new(file))
}

/// Identifies the container, validates its metadata and positions `reader`
/// at the start of the encoded audio.
pub fn probe<R: Read + Seek>(mut reader: R) -> Result<AudioSource<R>> {
    if let Some(header) = WavHeader::read(&mut reader)? {
        return open_wave(reader, header);
    }

    reader.seek(SeekFrom::Start(0))?;
    let mut decoder = FlacDecoder::new();
    let info = probe_flac(&mut reader, &mut decoder)?;

    let descriptor = StreamDescriptor::new(
        ContainerKind::Flac,
        EncodingFlag::PCMSigned,
        info.channels as u16,
        info.sample_rate,
        info.bits_per_sample as u16,
        info.total_samples * info.channels as u64,
    )?;

    reader.seek(SeekFrom::Start(0))?;
    decoder.reset();

    let extension = window_extension(&info);
    let block = descriptor.block_samples();
    let buffer = DecodeBuffer::new(block, 4, extension)?;
    let flac = FlacReader::new(reader, decoder, block, extension)?;
    debug!(?descriptor, extension, "opened FLAC source");

    Ok(AudioSource {
        descriptor,
        reader: SampleReader::Flac(flac),
        buffer,
    })
}

fn open_wave<R: Read>(reader: R, header: WavHeader) -> Result<AudioSource<R>> {
    let descriptor = StreamDescriptor::new(
        ContainerKind::Wave,
        header.encoding()?,
        header.channel_count(),
        header.sampling_rate(),
        header.bits_per_sample(),
        header.total_samples(),
    )?;

    let data = WavDataReader::new(reader, header.data_len());
    let reader = match descriptor.bits_per_sample() {
        8 => SampleReader::U8(data),
        24 => SampleReader::S24(data),
        _ => SampleReader::Direct {
            data,
            shift: descriptor.shift(),
        },
    };
    let buffer = DecodeBuffer::for_wave(&descriptor)?;
    debug!(?descriptor, reader = reader.name(), "opened WAVE source");

    Ok(AudioSource {
        descriptor,
        reader,
        buffer,
    })
}

/// Feeds the stream to `decoder` until STREAMINFO has parsed.
fn probe_flac<R: Read>(reader: &mut R, decoder: &mut FlacDecoder) -> Result<StreamInfo> {
    let mut probe = try_alloc_bytes(FLAC_PROBE_BYTES)?;
    let mut held = 0;
    loop {
        let read = read_full(reader, &mut probe[held..])?;
        let available = held + read;
        let (consumed, _) = match decoder.process(&probe[..available], &mut []) {
            Ok(progress) => progress,
            Err(FlacError::NotFlac) => {
                return Err(VacError::InvalidInput(
                    "not a WAVE or FLAC stream".to_string(),
                ))
            }
            Err(other) => return Err(corrupt(other)),
        };
        if let Some(info) = decoder.stream_info() {
            return Ok(info.clone());
        }
        if read == 0 && consumed == 0 {
            return Err(VacError::InvalidInput(
                "stream ended before FLAC STREAMINFO".to_string(),
            ));
        }
        probe.copy_within(consumed..available, 0);
        held = available - consumed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;
    use vac_core::test_utils::{build_wav, encode_float, encode_pcm, sine_wave, WavFixture};
    use vac_core::SampleFormat;
    use vac_flac::test_utils::{sine_i32, FlacStreamWriter, Stereo, Subframe};

    fn wave(fixture: WavFixture, frames: usize) -> Cursor<Vec<u8>> {
        let sine = sine_wave(frames, fixture.channels as usize, fixture.sample_rate, 440.0, 0.5);
        let data = if fixture.format_tag == 3 {
            encode_float(&sine, fixture.bits_per_sample)
        } else {
            encode_pcm(&sine, fixture.bits_per_sample)
        };
        Cursor::new(build_wav(&fixture, &data))
    }

    #[test]
    fn test_probe_wave_variants() {
        let cases = [
            (WavFixture::pcm(2, 44_100, 8), "u8", SampleFormat::I16),
            (WavFixture::pcm(2, 44_100, 16), "direct", SampleFormat::I16),
            (WavFixture::pcm(1, 22_050, 24), "s24", SampleFormat::I32),
            (WavFixture::pcm(2, 48_000, 32), "direct", SampleFormat::I32),
            (WavFixture::float(2, 44_100, 32), "direct", SampleFormat::F32),
            (WavFixture::float(6, 96_000, 64), "direct", SampleFormat::F64),
        ];
        for (fixture, reader, format) in cases {
            let channels = fixture.channels;
            let source = probe(wave(fixture, 1_000)).unwrap();
            let descriptor = source.descriptor();
            assert_eq!(descriptor.container(), ContainerKind::Wave);
            assert_eq!(descriptor.channel_count(), channels);
            assert_eq!(descriptor.total_samples(), 1_000 * channels as u64);
            assert_eq!(descriptor.sample_format(), format);
            assert_eq!(source.reader().name(), reader);
        }
    }

    #[test]
    fn test_probe_wave_skips_unknown_chunks() {
        let fixture = WavFixture {
            extensible: true,
            extra_chunk: Some((*b"LIST", vec![1, 2, 3])),
            ..WavFixture::pcm(2, 44_100, 16)
        };
        let source = probe(wave(fixture, 10)).unwrap();
        assert_eq!(source.descriptor().total_samples(), 20);
    }

    #[test]
    fn test_probe_rejects_64bit_pcm() {
        let fixture = WavFixture::pcm(2, 44_100, 64);
        let bytes = build_wav(&fixture, &[0u8; 64]);
        assert!(matches!(
            probe(Cursor::new(bytes)),
            Err(VacError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_probe_rejects_unknown_wave_encoding() {
        let fixture = WavFixture {
            format_tag: 2,
            ..WavFixture::pcm(2, 44_100, 16)
        };
        let bytes = build_wav(&fixture, &[0u8; 64]);
        assert!(matches!(
            probe(Cursor::new(bytes)),
            Err(VacError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_probe_rejects_empty_data() {
        let bytes = build_wav(&WavFixture::pcm(2, 44_100, 16), &[]);
        assert!(matches!(
            probe(Cursor::new(bytes)),
            Err(VacError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_probe_flac_rewinds() {
        let samples = sine_i32(2_000, 2, 44_100, 24);
        let mut writer = FlacStreamWriter::new(44_100, 2, 24);
        // Enough metadata that STREAMINFO is found well before the first frame.
        writer.add_metadata_block(1, vec![0; 1_000]);
        writer.add_interleaved(&samples, 512, &Subframe::Fixed(1), Stereo::Independent);
        let bytes = writer.finish();

        let mut source = probe(Cursor::new(bytes)).unwrap();
        let descriptor = source.descriptor().clone();
        assert_eq!(descriptor.container(), ContainerKind::Flac);
        assert_eq!(descriptor.bits_per_sample(), 24);
        assert_eq!(descriptor.shift(), 8);
        assert_eq!(descriptor.total_samples(), 4_000);
        assert_eq!(descriptor.sample_format(), SampleFormat::I32);

        // The replay starts at byte 0, so the first samples decode intact.
        let n = source.read_block(4).unwrap();
        assert_eq!(n, 4);
        assert_eq!(LittleEndian::read_i32(source.samples(1)), samples[0] << 8);
        assert_eq!(LittleEndian::read_i32(&source.samples(4)[12..]), samples[3] << 8);
    }

    #[test]
    fn test_probe_garbage_is_invalid_input() {
        let bytes = b"ID3\x03 definitely not audio".to_vec();
        assert!(matches!(
            probe(Cursor::new(bytes)),
            Err(VacError::InvalidInput(_))
        ));
        assert!(matches!(
            probe(Cursor::new(b"fLa".to_vec())),
            Err(VacError::InvalidInput(_))
        ));
    }
}
