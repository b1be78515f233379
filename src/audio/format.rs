//! PCM16 format descriptor and chunk value types.

use crate::error::GatewayError;

/// Raw PCM sample encoding. The kernel only ever supports 16-bit signed PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Pcm16,
}

/// Describes a PCM stream: sample rate, channel count, and sample encoding.
///
/// Immutable once constructed. Bytes-per-frame is always `2 * channels` since
/// `sample_format` is always `Pcm16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub const fn new(sample_rate_hz: u32, channels: u8) -> Self {
        Self {
            sample_rate_hz,
            channels,
            sample_format: SampleFormat::Pcm16,
        }
    }

    /// Default ACS target format: 16 kHz mono pcm16.
    pub const fn acs_default() -> Self {
        Self::new(16_000, 1)
    }

    pub fn bytes_per_sample(&self) -> usize {
        2
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Validates `sample_format` and `channels`.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !matches!(self.channels, 1 | 2) {
            return Err(GatewayError::UnsupportedAudioFormat(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// Bytes needed to hold `ms` milliseconds of audio at this format, rounded
    /// down to a whole frame.
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        if ms == 0 {
            return 0;
        }
        let frames = (self.sample_rate_hz as u64 * ms as u64) / 1000;
        frames as usize * self.bytes_per_frame()
    }
}

/// A slice of PCM audio with optional timing/sequence metadata.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub pcm: Vec<u8>,
    pub fmt: AudioFormat,
    pub timestamp_ms: Option<u64>,
    pub sequence: Option<u64>,
}

impl AudioChunk {
    pub fn new(pcm: Vec<u8>, fmt: AudioFormat) -> Self {
        Self {
            pcm,
            fmt,
            timestamp_ms: None,
            sequence: None,
        }
    }

    /// Duration in milliseconds, computed from frame count.
    pub fn duration_ms(&self) -> u64 {
        if self.pcm.is_empty() {
            return 0;
        }
        let frame_bytes = self.fmt.bytes_per_frame();
        let frames = self.pcm.len() / frame_bytes;
        (frames as u64 * 1000) / self.fmt.sample_rate_hz as u64
    }
}
