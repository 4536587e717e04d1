pub mod ingest;
pub mod pipeline;
pub mod resampler;
pub mod source;

pub use ingest::IngestClient;
pub use pipeline::AudioCapturePipeline;
pub use resampler::Decimator;
pub use source::{AudioSource, CpalAudioSource, FrameCallback, SourceStream};

/// Wire format sample rate: 16 kHz mono 16-bit little-endian PCM.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
