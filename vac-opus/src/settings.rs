use vac_core::{Result, VacError};

pub const MIN_BITRATE: u32 = 6_000;
pub const MAX_BITRATE_PER_CHANNEL: u32 = 256_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitrateMode {
    Cbr,
    Cvbr,
    #[default]
    Vbr,
}

impl BitrateMode {
    /// `0` CBR, `1` constrained VBR, `2` VBR.
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(BitrateMode::Cbr),
            1 => Ok(BitrateMode::Cvbr),
            2 => Ok(BitrateMode::Vbr),
            other => Err(VacError::InvalidSetting(format!(
                "VBR mode must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BitrateMode::Cbr => "CBR",
            BitrateMode::Cvbr => "CVBR",
            BitrateMode::Vbr => "VBR",
        }
    }
}

/// User-facing encoder settings. `None` fields resolve to defaults that depend
/// on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderSettings {
    /// Bits per second.
    pub bitrate: Option<u32>,
    pub mode: BitrateMode,
    pub lsb_depth: Option<u8>,
}

/// Settings with every default filled in for a particular stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub bitrate: u32,
    pub mode: BitrateMode,
    /// Significant input bits, 8 to 24. Advisory only: it is validated and
    /// logged, but the `opus` bindings expose no LSB-depth control, so the
    /// encoder never receives it.
    pub lsb_depth: u8,
}

impl EncoderSettings {
    pub fn default_bitrate(channels: u16) -> u32 {
        1000 * (64 + 32 * channels as u32)
    }

    pub fn validate(&self, channels: u16) -> Result<()> {
        if !(1..=8).contains(&channels) {
            return Err(VacError::InvalidSetting(format!(
                "Opus supports 1 to 8 channels, got {}",
                channels
            )));
        }
        if let Some(bitrate) = self.bitrate {
            let max = MAX_BITRATE_PER_CHANNEL * channels as u32;
            if !(MIN_BITRATE..=max).contains(&bitrate) {
                return Err(VacError::InvalidSetting(format!(
                    "bitrate must be between {} and {} kbps for {} channels, got {:.3} kbps",
                    MIN_BITRATE / 1000,
                    max / 1000,
                    channels,
                    bitrate as f64 / 1000.0
                )));
            }
        }
        if let Some(lsb) = self.lsb_depth {
            if !(8..=24).contains(&lsb) {
                return Err(VacError::InvalidSetting(format!(
                    "LSB depth must be between 8 and 24, got {}",
                    lsb
                )));
            }
        }
        Ok(())
    }

    pub fn resolve(&self, channels: u16, bits_per_sample: u16) -> Result<ResolvedSettings> {
        self.validate(channels)?;
        Ok(ResolvedSettings {
            bitrate: self
                .bitrate
                .unwrap_or_else(|| Self::default_bitrate(channels)),
            mode: self.mode,
            lsb_depth: self
                .lsb_depth
                .unwrap_or_else(|| bits_per_sample.clamp(8, 24) as u8),
        })
    }
}
