use thiserror::Error;

/// Every failure in the pipeline is fatal; there is no retry and no partial
/// result recovery.
#[derive(Debug, Error)]
pub enum VacError {
    /// Neither a valid WAVE nor a valid FLAC stream, or required metadata is zero.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A recognized container whose encoding or bit depth cannot be handled.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("unable to allocate {0} bytes")]
    AllocationError(usize),

    /// The FLAC decoder hit an unrecoverable parse failure mid-stream.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("encoder error: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VacError>;

/// Allocates a zeroed byte buffer, reporting failure instead of aborting.
pub fn try_alloc_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| VacError::AllocationError(len))?;
    buf.resize(len, 0);
    Ok(buf)
}
