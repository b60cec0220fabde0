use crate::audio_types::EncodingFlag;
use crate::error::{Result, VacError};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read};
use tracing::debug;

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const FMT_EXTENSIBLE_LEN: usize = 40;

/// The `fmt ` and `data` facts of a RIFF/WAVE file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    format_tag: u16,
    channel_count: u16,
    sampling_rate: u32,
    bits_per_sample: u16,
    data_len: u64,
}

impl WavHeader {
    /// Reads the RIFF header and walks chunks up to the start of `data`.
    ///
    /// Returns `Ok(None)` when the stream does not start with `RIFF....WAVE`,
    /// so the caller can try another container. On success the reader is left
    /// at the first byte of sample data.
    pub fn read<R: Read>(reader: &mut R) -> Result<Option<WavHeader>> {
        let mut riff = [0u8; 12];
        if read_full(reader, &mut riff)? < riff.len() {
            return Ok(None);
        }
        if &riff[..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
            return Ok(None);
        }

        let mut fmt: Option<(u16, u16, u32, u16)> = None;
        loop {
            let mut chunk = [0u8; 8];
            if read_full(reader, &mut chunk)? < chunk.len() {
                return Err(VacError::InvalidInput(
                    "WAVE file has no data chunk".to_string(),
                ));
            }
            let chunk_size = LittleEndian::read_u32(&chunk[4..8]) as u64;

            match &chunk[..4] {
                b"fmt " => {
                    if chunk_size < 16 {
                        return Err(VacError::InvalidInput(format!(
                            "fmt chunk too small: {} bytes",
                            chunk_size
                        )));
                    }
                    // Only the extensible layout's first 40 bytes matter.
                    let mut body = [0u8; FMT_EXTENSIBLE_LEN];
                    let len = chunk_size.min(FMT_EXTENSIBLE_LEN as u64) as usize;
                    if read_full(reader, &mut body[..len])? < len {
                        return Err(VacError::InvalidInput("truncated fmt chunk".to_string()));
                    }
                    skip(reader, chunk_size - len as u64 + (chunk_size & 1))?;
                    fmt = Some(parse_fmt(&body[..len]));
                }
                b"data" => {
                    let (format_tag, channel_count, sampling_rate, bits_per_sample) =
                        fmt.ok_or_else(|| {
                            VacError::InvalidInput("data chunk before fmt chunk".to_string())
                        })?;

                    let header = WavHeader {
                        format_tag,
                        channel_count,
                        sampling_rate,
                        bits_per_sample,
                        data_len: chunk_size,
                    };
                    debug!(?header, "parsed WAVE header");
                    return Ok(Some(header));
                }
                other => {
                    debug!(
                        chunk = %String::from_utf8_lossy(other),
                        size = chunk_size,
                        "skipping WAVE chunk"
                    );
                    skip(reader, chunk_size + (chunk_size & 1))?;
                }
            }
        }
    }

    pub fn format_tag(&self) -> u16 {
        self.format_tag
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// Size of the `data` chunk in bytes.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Interleaved sample count implied by the data chunk size.
    pub fn total_samples(&self) -> u64 {
        match self.bits_per_sample / 8 {
            0 => 0,
            width => self.data_len / width as u64,
        }
    }

    pub fn encoding(&self) -> Result<EncodingFlag> {
        match self.format_tag {
            WAVE_FORMAT_PCM => Ok(EncodingFlag::PCMSigned),
            WAVE_FORMAT_IEEE_FLOAT => Ok(EncodingFlag::PCMFloat),
            tag => Err(VacError::UnsupportedFormat(format!(
                "only LPCM and floating-point samples are supported (format tag {:#06x})",
                tag
            ))),
        }
    }
}

fn parse_fmt(body: &[u8]) -> (u16, u16, u32, u16) {
    let mut format_tag = LittleEndian::read_u16(&body[0..2]);
    let channel_count = LittleEndian::read_u16(&body[2..4]);
    let sampling_rate = LittleEndian::read_u32(&body[4..8]);
    let bits_per_sample = LittleEndian::read_u16(&body[14..16]);

    // WAVE_FORMAT_EXTENSIBLE carries the real tag in the first two bytes of
    // the sub-format GUID.
    if format_tag == WAVE_FORMAT_EXTENSIBLE && body.len() >= FMT_EXTENSIBLE_LEN {
        format_tag = LittleEndian::read_u16(&body[24..26]);
    }

    (format_tag, channel_count, sampling_rate, bits_per_sample)
}

/// Reads sample bytes from a `data` chunk, never past its end.
pub struct WavDataReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> WavDataReader<R> {
    pub fn new(inner: R, data_len: u64) -> Self {
        Self {
            inner,
            remaining: data_len,
        }
    }

    /// Fills `buf` as far as the data chunk allows. A count below `buf.len()`
    /// means the end of the chunk or of the file was reached.
    pub fn read_data(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let read = read_full(&mut self.inner, &mut buf[..want])?;
        self.remaining -= read as u64;
        Ok(read)
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

/// `fread` semantics: keeps reading until `buf` is full or the source is
/// exhausted.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn skip<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "WAVE chunk extends past end of file",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_wav, WavFixture};
    use std::io::Cursor;

    #[test]
    fn test_read_header_16bit_pcm() {
        let bytes = build_wav(&WavFixture::pcm(2, 44_100, 16), &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut cursor = Cursor::new(bytes);
        let header = WavHeader::read(&mut cursor).unwrap().unwrap();

        assert_eq!(header.channel_count(), 2);
        assert_eq!(header.sampling_rate(), 44_100);
        assert_eq!(header.bits_per_sample(), 16);
        assert_eq!(header.data_len(), 8);
        assert_eq!(header.total_samples(), 4);
        assert_eq!(header.encoding().unwrap(), EncodingFlag::PCMSigned);
        assert_eq!(cursor.position(), 44);
    }

    #[test]
    fn test_read_header_skips_unknown_chunks() {
        let mut fixture = WavFixture::pcm(1, 48_000, 24);
        fixture.extra_chunk = Some((*b"LIST", vec![0xAA; 5]));
        let bytes = build_wav(&fixture, &[1, 2, 3]);
        let mut cursor = Cursor::new(bytes);
        let header = WavHeader::read(&mut cursor).unwrap().unwrap();

        assert_eq!(header.data_len(), 3);
        assert_eq!(header.total_samples(), 1);
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![1, 2, 3]);
    }

    #[test]
    fn test_read_header_extensible_float() {
        let mut fixture = WavFixture::float(2, 96_000, 32);
        fixture.extensible = true;
        let bytes = build_wav(&fixture, &[0u8; 16]);
        let header = WavHeader::read(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert_eq!(header.format_tag(), WAVE_FORMAT_IEEE_FLOAT);
        assert_eq!(header.encoding().unwrap(), EncodingFlag::PCMFloat);
    }

    #[test]
    fn test_not_a_wave_file() {
        let mut cursor = Cursor::new(b"fLaC\0\0\0\x22rest-of-stream".to_vec());
        assert!(WavHeader::read(&mut cursor).unwrap().is_none());

        let mut short = Cursor::new(b"RIFF".to_vec());
        assert!(WavHeader::read(&mut short).unwrap().is_none());
    }

    #[test]
    fn test_alaw_is_unsupported() {
        let mut fixture = WavFixture::pcm(1, 8_000, 8);
        fixture.format_tag = 6;
        let bytes = build_wav(&fixture, &[0u8; 4]);
        let header = WavHeader::read(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert!(matches!(
            header.encoding(),
            Err(VacError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_data_chunk() {
        let mut bytes = build_wav(&WavFixture::pcm(1, 8_000, 16), &[]);
        bytes.truncate(36);
        assert!(matches!(
            WavHeader::read(&mut Cursor::new(bytes)),
            Err(VacError::InvalidInput(_))
        ));
    }

    fn riff_with_fmt(fmt_size: u32, fmt_body: &[u8], tail: &[u8]) -> Vec<u8> {
        let mut bytes = b"RIFF\0\0\0\0WAVEfmt ".to_vec();
        bytes.extend_from_slice(&fmt_size.to_le_bytes());
        bytes.extend_from_slice(fmt_body);
        bytes.extend_from_slice(tail);
        bytes
    }

    fn pcm_fmt(channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let align = channels * bits / 8;
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
        fmt.extend_from_slice(&channels.to_le_bytes());
        fmt.extend_from_slice(&rate.to_le_bytes());
        fmt.extend_from_slice(&(rate * align as u32).to_le_bytes());
        fmt.extend_from_slice(&align.to_le_bytes());
        fmt.extend_from_slice(&bits.to_le_bytes());
        fmt
    }

    #[test]
    fn test_huge_fmt_chunk_is_skipped_not_buffered() {
        let bytes = riff_with_fmt(0xFFFF_FFF0, &pcm_fmt(2, 44_100, 16), &[0u8; 64]);
        assert!(matches!(
            WavHeader::read(&mut Cursor::new(bytes)),
            Err(VacError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof
        ));

        let truncated = riff_with_fmt(0xFFFF_FFF0, &pcm_fmt(2, 44_100, 16)[..10], &[]);
        assert!(matches!(
            WavHeader::read(&mut Cursor::new(truncated)),
            Err(VacError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fmt_chunk_with_trailing_bytes() {
        let mut fmt = pcm_fmt(1, 22_050, 16);
        fmt.resize(50, 0x5A);
        let bytes = riff_with_fmt(50, &fmt, b"data\x02\0\0\0\x34\x12");
        let mut cursor = Cursor::new(bytes);
        let header = WavHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(header.sampling_rate(), 22_050);
        assert_eq!(header.format_tag(), WAVE_FORMAT_PCM);
        assert_eq!(header.data_len(), 2);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0x34, 0x12]);
    }

    #[test]
    fn test_odd_fmt_chunk_is_padded() {
        let mut fmt = pcm_fmt(1, 8_000, 8);
        fmt.resize(17, 0);
        fmt.push(0xEE);
        let bytes = riff_with_fmt(17, &fmt, b"data\x01\0\0\0\x80");
        let header = WavHeader::read(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert_eq!(header.bits_per_sample(), 8);
        assert_eq!(header.data_len(), 1);
    }

    #[test]
    fn test_data_reader_stops_at_chunk_end() {
        let mut source = Cursor::new(vec![1u8, 2, 3, 4, 5, 6]);
        let mut reader = WavDataReader::new(&mut source, 4);
        let mut buf = [0u8; 3];
        assert_eq!(reader.read_data(&mut buf).unwrap(), 3);
        assert_eq!(reader.read_data(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 4);
        assert_eq!(reader.read_data(&mut buf).unwrap(), 0);
        assert_eq!(reader.remaining(), 0);
    }
}
