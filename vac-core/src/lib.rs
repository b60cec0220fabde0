pub mod audio_bytes;
pub mod audio_packet;
pub mod audio_types;
pub mod error;
pub mod test_utils;
pub mod wav;

pub use audio_packet::{Encoder, Resampler};
pub use audio_types::{
    ContainerKind, EncodingFlag, SampleFormat, StreamDescriptor, OUTPUT_BLOCK_FRAMES,
    TARGET_SAMPLE_RATE,
};
pub use error::{try_alloc_bytes, Result, VacError};
