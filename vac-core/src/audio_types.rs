use crate::error::{Result, VacError};

/// Rate every stream is resampled to before encoding.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Output frames per pipeline iteration (two seconds at 48 kHz).
pub const OUTPUT_BLOCK_FRAMES: usize = 96_000;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ContainerKind {
    Wave,
    Flac,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EncodingFlag {
    PCMSigned,
    PCMFloat,
}

/// Numeric layout of the interleaved samples handed to the resampler.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SampleFormat {
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// One opened audio source. Built once by the probe and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    container: ContainerKind,
    encoding: EncodingFlag,
    channel_count: u16,
    sampling_rate: u32,
    bits_per_sample: u16,
    total_samples: u64,
    shift: u32,
    input_block_frames: usize,
    output_block_frames: usize,
}

impl StreamDescriptor {
    /// Validates the metadata and derives the per-format shift and block sizes.
    ///
    /// `total_samples` counts interleaved samples (frames times channels).
    pub fn new(
        container: ContainerKind,
        encoding: EncodingFlag,
        channel_count: u16,
        sampling_rate: u32,
        bits_per_sample: u16,
        total_samples: u64,
    ) -> Result<Self> {
        if channel_count == 0 || sampling_rate == 0 || bits_per_sample == 0 || total_samples == 0
        {
            return Err(VacError::InvalidInput(format!(
                "bad {:?} stream: channels={}, sample_rate={}, bits_per_sample={}, samples={}",
                container, channel_count, sampling_rate, bits_per_sample, total_samples
            )));
        }

        let shift = match (container, encoding, bits_per_sample) {
            (ContainerKind::Wave, EncodingFlag::PCMSigned, 8) => 0,
            (ContainerKind::Wave, EncodingFlag::PCMSigned, 16) => 1,
            (ContainerKind::Wave, EncodingFlag::PCMSigned, 24) => 0,
            (ContainerKind::Wave, EncodingFlag::PCMSigned, 32) => 2,
            (ContainerKind::Wave, EncodingFlag::PCMSigned, 64) => {
                return Err(VacError::UnsupportedFormat(
                    "64-bit LPCM is unsupported, use float instead".to_string(),
                ))
            }
            (ContainerKind::Wave, EncodingFlag::PCMFloat, 32) => 2,
            (ContainerKind::Wave, EncodingFlag::PCMFloat, 64) => 3,
            (ContainerKind::Flac, _, 4..=32) => 32 - bits_per_sample as u32,
            _ => {
                return Err(VacError::UnsupportedFormat(format!(
                    "unsupported word length: {} bits ({:?}, {:?})",
                    bits_per_sample, container, encoding
                )))
            }
        };

        let input_block_frames =
            ((OUTPUT_BLOCK_FRAMES as u64 * sampling_rate as u64) / TARGET_SAMPLE_RATE as u64)
                .max(1) as usize;

        Ok(Self {
            container,
            encoding,
            channel_count,
            sampling_rate,
            bits_per_sample,
            total_samples,
            shift,
            input_block_frames,
            output_block_frames: OUTPUT_BLOCK_FRAMES,
        })
    }

    pub fn container(&self) -> ContainerKind {
        self.container
    }

    pub fn encoding(&self) -> EncodingFlag {
        self.encoding
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

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Direct WAVE readers: log2 of the sample byte width.
    /// FLAC: left-justification shift into a 32-bit container.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn input_block_frames(&self) -> usize {
        self.input_block_frames
    }

    pub fn output_block_frames(&self) -> usize {
        self.output_block_frames
    }

    /// Nominal interleaved samples requested per iteration. A reader returning
    /// fewer marks the final iteration.
    pub fn block_samples(&self) -> usize {
        self.input_block_frames * self.channel_count as usize
    }

    /// Width of one sample as stored in the source container.
    pub fn source_bytes_per_sample(&self) -> usize {
        match self.container {
            ContainerKind::Wave => self.bits_per_sample as usize / 8,
            ContainerKind::Flac => 4,
        }
    }

    pub fn sample_format(&self) -> SampleFormat {
        match (self.container, self.encoding, self.bits_per_sample) {
            (ContainerKind::Flac, _, _) => SampleFormat::I32,
            (_, EncodingFlag::PCMFloat, 64) => SampleFormat::F64,
            (_, EncodingFlag::PCMFloat, _) => SampleFormat::F32,
            (_, EncodingFlag::PCMSigned, 8 | 16) => SampleFormat::I16,
            (_, EncodingFlag::PCMSigned, _) => SampleFormat::I32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(encoding: EncodingFlag, bits: u16) -> Result<StreamDescriptor> {
        StreamDescriptor::new(ContainerKind::Wave, encoding, 2, 44_100, bits, 88_200)
    }

    #[test]
    fn test_direct_shift_per_width() {
        assert_eq!(wave(EncodingFlag::PCMSigned, 16).unwrap().shift(), 1);
        assert_eq!(wave(EncodingFlag::PCMSigned, 32).unwrap().shift(), 2);
        assert_eq!(wave(EncodingFlag::PCMFloat, 32).unwrap().shift(), 2);
        assert_eq!(wave(EncodingFlag::PCMFloat, 64).unwrap().shift(), 3);
    }

    #[test]
    fn test_64bit_pcm_is_unsupported_but_float_is_not() {
        assert!(matches!(
            wave(EncodingFlag::PCMSigned, 64),
            Err(VacError::UnsupportedFormat(_))
        ));
        let desc = wave(EncodingFlag::PCMFloat, 64).unwrap();
        assert_eq!(desc.sample_format(), SampleFormat::F64);
    }

    #[test]
    fn test_unrecognized_depth() {
        assert!(matches!(
            wave(EncodingFlag::PCMSigned, 12),
            Err(VacError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            wave(EncodingFlag::PCMFloat, 16),
            Err(VacError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_zero_metadata_is_invalid_input() {
        let err = StreamDescriptor::new(
            ContainerKind::Flac,
            EncodingFlag::PCMSigned,
            2,
            44_100,
            16,
            0,
        );
        assert!(matches!(err, Err(VacError::InvalidInput(_))));
    }

    #[test]
    fn test_block_sizes_follow_sample_rate() {
        let desc = wave(EncodingFlag::PCMSigned, 16).unwrap();
        assert_eq!(desc.input_block_frames(), 88_200);
        assert_eq!(desc.output_block_frames(), 96_000);
        assert_eq!(desc.block_samples(), 176_400);

        let flac = StreamDescriptor::new(
            ContainerKind::Flac,
            EncodingFlag::PCMSigned,
            1,
            96_000,
            24,
            10,
        )
        .unwrap();
        assert_eq!(flac.input_block_frames(), 192_000);
        assert_eq!(flac.shift(), 8);
        assert_eq!(flac.sample_format(), SampleFormat::I32);
    }

    #[test]
    fn test_resampler_formats() {
        assert_eq!(
            wave(EncodingFlag::PCMSigned, 8).unwrap().sample_format(),
            SampleFormat::I16
        );
        assert_eq!(
            wave(EncodingFlag::PCMSigned, 24).unwrap().sample_format(),
            SampleFormat::I32
        );
        assert_eq!(
            wave(EncodingFlag::PCMFloat, 32).unwrap().sample_format(),
            SampleFormat::F32
        );
    }
}
