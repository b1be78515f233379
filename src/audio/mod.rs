//! PCM16 audio kernel: format descriptor, chunker, streaming resampler,
//! channel mixing, and RMS energy.

pub mod format;
pub mod kernel;
pub mod resampler;

pub use format::{AudioChunk, AudioFormat, SampleFormat};
pub use kernel::{resample_pcm16, rms_pcm16, split_by_ms, to_mono, to_stereo, trim_to_frame_boundary};
pub use resampler::StreamingResampler;
