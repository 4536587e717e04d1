pub mod client;
pub mod decoder;

pub use client::{ReplyStream, ReplySummary, StreamOutcome};
pub use decoder::StreamTokenDecoder;
