use vac_core::{Result, VacError};

/// OpusHead channel mapping: how output channels are spread over the
/// elementary streams of a (multi)stream packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    pub family: u8,
    pub streams: u8,
    pub coupled: u8,
    /// Output channel index to decoded channel index.
    pub table: Vec<u8>,
}

impl ChannelMapping {
    /// Family 0 for mono and stereo, Vorbis-order family 1 for 3..=8 channels.
    pub fn for_channels(channels: u16) -> Result<Self> {
        let (family, streams, coupled, table): (u8, u8, u8, &[u8]) = match channels {
            1 => (0, 1, 0, &[0]),
            2 => (0, 1, 1, &[0, 1]),
            3 => (1, 2, 1, &[0, 2, 1]),
            4 => (1, 2, 2, &[0, 1, 2, 3]),
            5 => (1, 3, 2, &[0, 4, 1, 2, 3]),
            6 => (1, 4, 2, &[0, 4, 1, 2, 3, 5]),
            7 => (1, 4, 3, &[0, 4, 1, 2, 3, 5, 6]),
            8 => (1, 5, 3, &[0, 6, 1, 2, 3, 4, 5, 7]),
            other => {
                return Err(VacError::InvalidSetting(format!(
                    "no Opus channel mapping for {} channels",
                    other
                )))
            }
        };
        Ok(Self {
            family,
            streams,
            coupled,
            table: table.to_vec(),
        })
    }

    pub fn channels(&self) -> usize {
        self.table.len()
    }

    /// Channels carried by stream `index`: coupled streams come first.
    pub fn stream_channels(&self, index: usize) -> usize {
        if index < self.coupled as usize {
            2
        } else {
            1
        }
    }

    /// The (stream, channel-within-stream) an output channel is coded in.
    pub fn locate(&self, channel: usize) -> (usize, usize) {
        let decoded = self.table[channel] as usize;
        let coupled_channels = 2 * self.coupled as usize;
        if decoded < coupled_channels {
            (decoded / 2, decoded % 2)
        } else {
            (self.coupled as usize + decoded - coupled_channels, 0)
        }
    }

    /// Splits `total` bits per second over the streams, coupled streams
    /// weighted double.
    pub fn stream_bitrates(&self, total: u32) -> Vec<u32> {
        let weights: Vec<u32> = (0..self.streams as usize)
            .map(|s| self.stream_channels(s) as u32)
            .collect();
        let sum: u32 = weights.iter().sum();
        weights
            .iter()
            .map(|&w| (total as u64 * w as u64 / sum as u64) as u32)
            .collect()
    }
}
