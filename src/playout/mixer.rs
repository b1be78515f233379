//! Per-participant PCM ring buffers mixed into one paced outbound stream per
//! call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Per-participant PCM16 ring buffer. `pop_frame` always returns exactly one
/// frame: real audio once the warm-up watermark has been crossed, silence
/// otherwise. Warm-up is armed once per stream and never re-armed except by
/// `clear`.
pub struct ParticipantAudioBuffer {
    frame_bytes: usize,
    start_buffer_bytes: usize,
    buffer: Vec<u8>,
    started: bool,
    silence_frame: Vec<u8>,
}

impl ParticipantAudioBuffer {
    pub fn new(sample_rate_hz: u32, channels: u8, frame_ms: u32, start_buffer_ms: u32) -> Self {
        let bytes_per_ms = (sample_rate_hz as u64 * channels as u64 * 2) / 1000;
        let frame_bytes = (bytes_per_ms * frame_ms as u64) as usize;
        let start_buffer_bytes = (bytes_per_ms * start_buffer_ms as u64) as usize;
        Self {
            frame_bytes,
            start_buffer_bytes,
            buffer: Vec::new(),
            started: start_buffer_ms == 0,
            silence_frame: vec![0u8; frame_bytes],
        }
    }

    pub fn append_audio(&mut self, pcm: &[u8]) {
        self.buffer.extend_from_slice(pcm);
    }

    /// Returns exactly one frame: real PCM if available post-warmup,
    /// otherwise silence.
    pub fn pop_frame(&mut self) -> Vec<u8> {
        if !self.started {
            if self.buffer.len() < self.start_buffer_bytes {
                return self.silence_frame.clone();
            }
            self.started = true;
        }

        if self.buffer.len() < self.frame_bytes {
            return self.silence_frame.clone();
        }

        self.buffer.drain(..self.frame_bytes).collect()
    }

    pub fn available_ms(&self, sample_rate_hz: u32, channels: u8) -> f64 {
        let bytes_per_ms = (sample_rate_hz as f64 * channels as f64 * 2.0) / 1000.0;
        if bytes_per_ms <= 0.0 {
            return 0.0;
        }
        self.buffer.len() as f64 / bytes_per_ms
    }

    /// Drops all buffered audio and re-arms warm-up.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.started = self.start_buffer_bytes == 0;
    }
}

fn mix_equal_gain(frames: &[Vec<u8>], frame_bytes: usize) -> Vec<u8> {
    if frames.len() == 1 {
        return frames[0].clone();
    }
    let sample_count = frame_bytes / 2;
    let mut mix = vec![0f32; sample_count];
    for frame in frames {
        for (i, sample_bytes) in frame.chunks_exact(2).enumerate().take(sample_count) {
            mix[i] += i16::from_le_bytes([sample_bytes[0], sample_bytes[1]]) as f32;
        }
    }
    let n = frames.len() as f32;
    let mut out = Vec::with_capacity(frame_bytes);
    for v in mix {
        let averaged = (v / n).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&averaged.to_le_bytes());
    }
    out
}

/// Mixes every registered participant buffer into one outbound frame per
/// tick, paced with absolute-deadline scheduling so a slow tick does not
/// shift the schedule (no catch-up burst after an overrun).
pub struct CallMixer {
    pub call_id: String,
    pub frame_ms: u64,
    frame_bytes: usize,
    buffers: Arc<Mutex<HashMap<String, ParticipantAudioBuffer>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CallMixer {
    pub fn new(call_id: impl Into<String>, sample_rate_hz: u32, channels: u8, frame_ms: u64) -> Self {
        let frame_bytes = ((sample_rate_hz as u64 * channels as u64 * 2 * frame_ms) / 1000) as usize;
        Self {
            call_id: call_id.into(),
            frame_ms,
            frame_bytes,
            buffers: Arc::new(Mutex::new(HashMap::new())),
            task: Mutex::new(None),
        }
    }

    pub async fn buffer_for(&self, participant_key: &str, sample_rate_hz: u32, channels: u8, start_buffer_ms: u32) {
        let mut buffers = self.buffers.lock().await;
        buffers.entry(participant_key.to_string()).or_insert_with(|| {
            ParticipantAudioBuffer::new(sample_rate_hz, channels, self.frame_ms as u32, start_buffer_ms)
        });
    }

    pub async fn append_audio(&self, participant_key: &str, pcm: &[u8]) {
        if let Some(buffer) = self.buffers.lock().await.get_mut(participant_key) {
            buffer.append_audio(pcm);
        }
    }

    pub async fn clear(&self, participant_key: Option<&str>) {
        let mut buffers = self.buffers.lock().await;
        match participant_key {
            Some(key) => {
                if let Some(buffer) = buffers.get_mut(key) {
                    buffer.clear();
                }
            }
            None => {
                for buffer in buffers.values_mut() {
                    buffer.clear();
                }
            }
        }
    }

    async fn mix_frame(&self) -> Vec<u8> {
        let mut buffers = self.buffers.lock().await;
        if buffers.is_empty() {
            return vec![0u8; self.frame_bytes];
        }
        let frames: Vec<Vec<u8>> = buffers.values_mut().map(|b| b.pop_frame()).collect();
        mix_equal_gain(&frames, self.frame_bytes)
    }

    /// Idempotent: starts the renderer task if it is not already running.
    pub async fn start<F, Fut>(self: &Arc<Self>, emit: F)
    where
        F: Fn(Vec<u8>, u64) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let this = self.clone();
        *task = Some(tokio::spawn(async move {
            this.run(emit).await;
        }));
    }

    async fn run<F, Fut>(self: Arc<Self>, emit: F)
    where
        F: Fn(Vec<u8>, u64) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let interval = Duration::from_millis(self.frame_ms);
        let start = tokio::time::Instant::now();
        let mut sequence: u64 = 0;
        loop {
            let frame = self.mix_frame().await;
            emit(frame, sequence).await;
            sequence += 1;

            let next_deadline = start + interval * sequence as u32;
            let now = tokio::time::Instant::now();
            if next_deadline > now {
                tokio::time::sleep_until(next_deadline).await;
            }
            // else: overran this tick; snap to now rather than bursting to catch up.
        }
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_frame_returns_silence_before_warmup_crossed() {
        let mut buf = ParticipantAudioBuffer::new(16_000, 1, 20, 60);
        buf.append_audio(&vec![9u8; 320]); // 10ms, below 60ms watermark
        let frame = buf.pop_frame();
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[test]
    fn pop_frame_returns_real_audio_once_started_and_not_rearmed() {
        let mut buf = ParticipantAudioBuffer::new(16_000, 1, 20, 0);
        buf.append_audio(&vec![7u8; 640 * 3]);
        let first = buf.pop_frame();
        assert!(first.iter().any(|&b| b != 0));
        // drain remaining audio to zero
        buf.pop_frame();
        buf.pop_frame();
        // warm-up already crossed and start_buffer_ms==0, so underrun is silence
        let underrun = buf.pop_frame();
        assert!(underrun.iter().all(|&b| b == 0));
    }

    #[test]
    fn clear_rearms_warmup() {
        let mut buf = ParticipantAudioBuffer::new(16_000, 1, 20, 60);
        buf.append_audio(&vec![1u8; 2000]);
        buf.pop_frame();
        buf.clear();
        buf.append_audio(&vec![1u8; 100]);
        let frame = buf.pop_frame();
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[test]
    fn mix_averages_multiple_participants() {
        let a = vec![100i16, 100].into_iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>();
        let b = vec![-100i16, -100].into_iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>();
        let mixed = mix_equal_gain(&[a, b], 4);
        let samples: Vec<i16> = mixed.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
        assert_eq!(samples, vec![0, 0]);
    }

    #[tokio::test]
    async fn single_participant_passes_through_without_averaging() {
        let mixer = Arc::new(CallMixer::new("call-1", 16_000, 1, 20));
        mixer.buffer_for("p1", 16_000, 1, 0).await;
        mixer.append_audio("p1", &vec![5u8; 640]).await;
        let frame = mixer.mix_frame().await;
        assert_eq!(frame, vec![5u8; 640]);
    }
}
