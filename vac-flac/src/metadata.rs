use crate::FlacError;

pub const STREAMINFO_LEN: usize = 34;
pub const BLOCK_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    CueSheet,
    Picture,
    Reserved(u8),
}

impl BlockType {
    fn from_code(code: u8) -> Result<Self, FlacError> {
        Ok(match code {
            0 => BlockType::StreamInfo,
            1 => BlockType::Padding,
            2 => BlockType::Application,
            3 => BlockType::SeekTable,
            4 => BlockType::VorbisComment,
            5 => BlockType::CueSheet,
            6 => BlockType::Picture,
            127 => {
                return Err(FlacError::BadMetadata(
                    "metadata block type 127 is invalid".to_string(),
                ))
            }
            other => BlockType::Reserved(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub is_last: bool,
    pub block_type: BlockType,
    pub length: usize,
}

impl BlockHeader {
    pub fn parse(bytes: &[u8; BLOCK_HEADER_LEN]) -> Result<Self, FlacError> {
        Ok(Self {
            is_last: bytes[0] & 0x80 != 0,
            block_type: BlockType::from_code(bytes[0] & 0x7F)?,
            length: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]) as usize,
        })
    }
}

/// The mandatory first metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    /// Zero when unknown.
    pub min_frame_size: u32,
    /// Zero when unknown.
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    /// Inter-channel samples; zero when unknown.
    pub total_samples: u64,
    pub md5: [u8; 16],
}

impl StreamInfo {
    pub fn parse(bytes: &[u8; STREAMINFO_LEN]) -> Result<Self, FlacError> {
        let min_block_size = u16::from_be_bytes([bytes[0], bytes[1]]);
        let max_block_size = u16::from_be_bytes([bytes[2], bytes[3]]);
        let min_frame_size = u32::from_be_bytes([0, bytes[4], bytes[5], bytes[6]]);
        let max_frame_size = u32::from_be_bytes([0, bytes[7], bytes[8], bytes[9]]);

        // 20 bits rate, 3 bits channels-1, 5 bits bps-1, 36 bits total.
        let packed = u64::from_be_bytes([
            bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17],
        ]);
        let sample_rate = (packed >> 44) as u32;
        let channels = ((packed >> 41) & 0x7) as u8 + 1;
        let bits_per_sample = ((packed >> 36) & 0x1F) as u8 + 1;
        let total_samples = packed & 0xF_FFFF_FFFF;

        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&bytes[18..34]);

        if max_block_size < 16 || min_block_size > max_block_size {
            return Err(FlacError::BadMetadata(format!(
                "block size range {}..={} is invalid",
                min_block_size, max_block_size
            )));
        }
        if sample_rate == 0 {
            return Err(FlacError::BadMetadata("sample rate is zero".to_string()));
        }
        if bits_per_sample < 4 {
            return Err(FlacError::BadMetadata(format!(
                "{} bits per sample is below the minimum of 4",
                bits_per_sample
            )));
        }

        Ok(Self {
            min_block_size,
            max_block_size,
            min_frame_size,
            max_frame_size,
            sample_rate,
            channels,
            bits_per_sample,
            total_samples,
            md5,
        })
    }

    /// Upper bound on the encoded size of one frame: the verbatim encoding of
    /// a full block plus header and CRC overhead, or the recorded maximum if
    /// that is larger.
    pub fn max_encoded_frame_len(&self) -> usize {
        let channels = self.channels as usize;
        // A side channel carries one extra bit per sample.
        let payload_bits =
            self.max_block_size as usize * (channels * self.bits_per_sample as usize + 1);
        let verbatim = 16 + channels * 8 + payload_bits.div_ceil(8) + 2;
        verbatim.max(self.max_frame_size as usize)
    }
}
