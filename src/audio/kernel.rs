//! Pure PCM16 operations: frame alignment, chunking, channel mixing, RMS
//! energy.

use super::format::AudioFormat;
use crate::error::GatewayError;

/// Trim `pcm` to the largest prefix whose length is a multiple of
/// `fmt.bytes_per_frame()`.
pub fn trim_to_frame_boundary(pcm: &[u8], fmt: AudioFormat) -> &[u8] {
    let frame_bytes = fmt.bytes_per_frame();
    let remainder = pcm.len() % frame_bytes;
    &pcm[..pcm.len() - remainder]
}

/// Split `pcm` into frame-aligned chunks of `chunk_ms` duration each; the
/// final chunk may be shorter but remains frame-aligned.
pub fn split_by_ms(pcm: &[u8], fmt: AudioFormat, chunk_ms: u32) -> Vec<Vec<u8>> {
    if chunk_ms == 0 {
        return Vec::new();
    }
    let trimmed = trim_to_frame_boundary(pcm, fmt);
    let chunk_size = fmt.bytes_for_ms(chunk_ms);
    if chunk_size == 0 {
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_vec()]
        };
    }
    trimmed.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

/// Downmix stereo to mono by averaging channels with equal gain; a no-op
/// pass-through when `src_channels == 1`.
pub fn to_mono(pcm: &[u8], src_channels: u8) -> Result<Vec<u8>, GatewayError> {
    match src_channels {
        1 => Ok(pcm.to_vec()),
        2 => {
            let mut out = Vec::with_capacity(pcm.len() / 2);
            for frame in pcm.chunks_exact(4) {
                let l = i16::from_le_bytes([frame[0], frame[1]]) as i32;
                let r = i16::from_le_bytes([frame[2], frame[3]]) as i32;
                let avg = ((l + r) / 2) as i16;
                out.extend_from_slice(&avg.to_le_bytes());
            }
            Ok(out)
        }
        n => Err(GatewayError::UnsupportedAudioFormat(format!(
            "unsupported channel count for mono conversion: {n}"
        ))),
    }
}

/// Upmix mono to stereo by duplication; a no-op pass-through when
/// `src_channels == 2`.
pub fn to_stereo(pcm: &[u8], src_channels: u8) -> Result<Vec<u8>, GatewayError> {
    match src_channels {
        2 => Ok(pcm.to_vec()),
        1 => {
            let mut out = Vec::with_capacity(pcm.len() * 2);
            for sample in pcm.chunks_exact(2) {
                out.extend_from_slice(sample);
                out.extend_from_slice(sample);
            }
            Ok(out)
        }
        n => Err(GatewayError::UnsupportedAudioFormat(format!(
            "unsupported channel count for stereo conversion: {n}"
        ))),
    }
}

/// One-shot resample with no cross-call state. Thin wrapper around
/// `StreamingResampler` so the two never drift out of sync.
pub fn resample_pcm16(pcm: &[u8], src_rate: u32, dst_rate: u32, channels: u8) -> Vec<u8> {
    if src_rate == dst_rate || pcm.is_empty() {
        return pcm.to_vec();
    }
    let mut resampler = super::resampler::StreamingResampler::new(src_rate, dst_rate, channels);
    let mut out = resampler.process(pcm);
    out.extend(resampler.flush());
    out
}

/// Float RMS energy of PCM16 samples. For stereo, returns the max of the two
/// per-channel RMS values so either channel's energy can trip the VAD.
pub fn rms_pcm16(pcm: &[u8], channels: u8) -> f64 {
    if pcm.is_empty() || channels == 0 {
        return 0.0;
    }
    let channels = channels as usize;
    let frame_bytes = 2 * channels;
    let trimmed = &pcm[..pcm.len() - (pcm.len() % frame_bytes)];
    if trimmed.is_empty() {
        return 0.0;
    }

    let mut sums = vec![0f64; channels];
    let mut counts = vec![0u64; channels];
    for frame in trimmed.chunks_exact(frame_bytes) {
        for (ch, sample_bytes) in frame.chunks_exact(2).enumerate() {
            let sample = i16::from_le_bytes([sample_bytes[0], sample_bytes[1]]) as f64;
            sums[ch] += sample * sample;
            counts[ch] += 1;
        }
    }

    sums.iter()
        .zip(counts.iter())
        .map(|(&sum, &count)| if count == 0 { 0.0 } else { (sum / count as f64).sqrt() })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(rate: u32, ch: u8) -> AudioFormat {
        AudioFormat::new(rate, ch)
    }

    #[test]
    fn trim_drops_partial_frame() {
        let f = fmt(16000, 1);
        let pcm = vec![0u8; 641]; // 640 is frame-aligned (320 samples * 2 bytes)
        assert_eq!(trim_to_frame_boundary(&pcm, f).len(), 640);
    }

    #[test]
    fn split_by_ms_concatenates_to_trimmed() {
        let f = fmt(16000, 1);
        let pcm = vec![1u8; 1601];
        let trimmed = trim_to_frame_boundary(&pcm, f).to_vec();
        let chunks = split_by_ms(&pcm, f, 20);
        let joined: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(joined, trimmed);
    }

    #[test]
    fn mono_stereo_roundtrip_preserves_length_and_alignment() {
        let f = fmt(16000, 2);
        let stereo: Vec<u8> = (0..640u16).flat_map(|s| s.to_le_bytes()).collect();
        let mono = to_mono(&stereo, 2).unwrap();
        let back = to_stereo(&mono, 1).unwrap();
        assert_eq!(back.len(), stereo.len());
        assert_eq!(back.len() % f.bytes_per_frame(), 0);
    }

    #[test]
    fn mono_value_preserved_by_equal_gain_average() {
        let mono: Vec<u8> = vec![100i16, -200, 300]
            .into_iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let stereo = to_stereo(&mono, 1).unwrap();
        let back = to_mono(&stereo, 2).unwrap();
        assert_eq!(back, mono);
    }

    #[test]
    fn rms_doubles_when_samples_double() {
        let samples: Vec<i16> = vec![100, -100, 200, -200];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let doubled: Vec<u8> = samples
            .iter()
            .flat_map(|s| (s.saturating_mul(2)).to_le_bytes())
            .collect();
        let r1 = rms_pcm16(&pcm, 1);
        let r2 = rms_pcm16(&doubled, 1);
        assert!((r2 - 2.0 * r1).abs() < 1e-6);
    }

    #[test]
    fn empty_input_yields_empty_or_zero() {
        let f = fmt(16000, 1);
        assert_eq!(trim_to_frame_boundary(&[], f).len(), 0);
        assert_eq!(rms_pcm16(&[], 1), 0.0);
    }

    #[test]
    fn unsupported_channel_count_fails() {
        let pcm = vec![0u8; 8];
        assert!(to_mono(&pcm, 3).is_err());
    }
}
