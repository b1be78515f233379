//! Buffers provider audio deltas per stream and starts paced ACS playout.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use log::warn;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::audio::{to_mono, to_stereo, AudioFormat, StreamingResampler};
use crate::barge_in::BargeInManager;
use crate::error::GatewayError;
use crate::playout;
use crate::playout::PlayoutStore;

use super::super::acs_publisher::AcsAudioPublisher;
use super::super::dispatch::ProviderOutputHandler;
use super::super::ProviderOutputEvent;

fn decode_audio_b64(audio_b64: &str) -> Result<Vec<u8>, GatewayError> {
    base64::engine::general_purpose::STANDARD
        .decode(audio_b64)
        .map_err(|e| GatewayError::AudioDecoding(e.to_string()))
}

fn match_channels(pcm: &[u8], source_channels: u8, target_channels: u8) -> Result<Vec<u8>, GatewayError> {
    match (source_channels, target_channels) {
        (a, b) if a == b => Ok(pcm.to_vec()),
        (1, 2) => to_stereo(pcm, 1),
        (2, 1) => to_mono(pcm, 2),
        (a, _) => Err(GatewayError::UnsupportedAudioFormat(format!("unsupported channel count: {a}"))),
    }
}

fn resolve_source_format(event: &ProviderOutputEvent, target: AudioFormat) -> AudioFormat {
    let fmt = event.payload.get("format").and_then(Value::as_object);
    let sample_rate_hz = fmt
        .and_then(|f| f.get("sample_rate_hz"))
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(target.sample_rate_hz);
    let channels = fmt
        .and_then(|f| f.get("channels"))
        .and_then(Value::as_u64)
        .map(|v| v as u8)
        .unwrap_or(target.channels);
    AudioFormat::new(sample_rate_hz, channels)
}

/// Buffers provider `audio.delta` events per `(session, participant,
/// stream_id)` stream and starts a paced playout task for each one. Each
/// stream keeps its own [`StreamingResampler`] so deltas resample as one
/// continuous waveform rather than clicking at chunk boundaries.
pub struct AudioDeltaHandler {
    publisher: Arc<AcsAudioPublisher>,
    store: Arc<PlayoutStore>,
    target_format: AudioFormat,
    frame_ms: u64,
    warm_up_watermark_ms: u64,
    barge_in_manager: Arc<BargeInManager>,
    resamplers: Mutex<HashMap<String, StreamingResampler>>,
}

impl AudioDeltaHandler {
    pub fn new(
        publisher: Arc<AcsAudioPublisher>,
        store: Arc<PlayoutStore>,
        target_format: AudioFormat,
        frame_ms: u64,
        warm_up_watermark_ms: u64,
        barge_in_manager: Arc<BargeInManager>,
    ) -> Self {
        Self {
            publisher,
            store,
            target_format,
            frame_ms,
            warm_up_watermark_ms,
            barge_in_manager,
            resamplers: Mutex::new(HashMap::new()),
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.target_format.bytes_for_ms(self.frame_ms as u32)
    }

    /// Bytes that must accumulate in a fresh stream's buffer before it emits
    /// real audio instead of withholding.
    pub fn warm_up_bytes(&self) -> usize {
        self.target_format.bytes_for_ms(self.warm_up_watermark_ms as u32)
    }

    pub fn target_format(&self) -> AudioFormat {
        self.target_format
    }

    async fn transcode(&self, key: &str, pcm: &[u8], source: AudioFormat) -> Result<Vec<u8>, GatewayError> {
        let target = self.target_format;
        if source == target {
            self.resamplers.lock().await.remove(key);
            return Ok(pcm.to_vec());
        }

        let channel_matched = match_channels(pcm, source.channels, target.channels)?;
        if source.sample_rate_hz == target.sample_rate_hz {
            self.resamplers.lock().await.remove(key);
            return Ok(channel_matched);
        }

        let mut resamplers = self.resamplers.lock().await;
        let resampler = resamplers
            .entry(key.to_string())
            .or_insert_with(|| StreamingResampler::new(source.sample_rate_hz, target.sample_rate_hz, target.channels));
        Ok(resampler.process(&channel_matched))
    }

    /// Flushes and discards the stream's resampler, if any.
    pub async fn clear_stream(&self, key: &str) -> Vec<u8> {
        match self.resamplers.lock().await.remove(key) {
            Some(mut resampler) => resampler.flush(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ProviderOutputHandler for AudioDeltaHandler {
    fn can_handle(&self, event: &ProviderOutputEvent) -> bool {
        event.event_type == "audio.delta"
    }

    async fn handle(&self, event: Arc<ProviderOutputEvent>) {
        let audio_b64 = match event.payload.get("audio_b64").and_then(Value::as_str) {
            Some(v) => v,
            None => {
                warn!("audio delta missing payload.audio_b64 for session={}", event.session_id);
                return;
            }
        };

        let key = playout::stream_key(&event);
        let frame_bytes = self.frame_bytes();
        let stream = self.store.get_or_create(&key, self.target_format, frame_bytes, self.warm_up_bytes()).await;
        self.barge_in_manager
            .register_playback(
                key.clone(),
                event.session_id.clone(),
                event.participant_id.clone(),
                event.commit_id.clone(),
                event.stream_id.clone(),
                event.provider.clone(),
            )
            .await;
        let source_format = resolve_source_format(&event, self.target_format);

        let decoded = match decode_audio_b64(audio_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.publisher.publish_audio_done(&event, "error", Some(&e.to_string())).await;
                playout::cancel(&stream).await;
                self.store.remove(&key).await;
                self.barge_in_manager.clear_playback(&key).await;
                return;
            }
        };

        let converted = match self.transcode(&key, &decoded, source_format).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.publisher.publish_audio_done(&event, "error", Some(&e.to_string())).await;
                playout::cancel(&stream).await;
                self.store.remove(&key).await;
                self.barge_in_manager.clear_playback(&key).await;
                return;
            }
        };

        stream.extend(&converted).await;

        let publisher = self.publisher.clone();
        let frame_ms = self.frame_ms;
        playout::ensure_task(stream, frame_ms, move |chunk| {
            let publisher = publisher.clone();
            async move {
                publisher.publish_audio_chunk(&chunk).await;
            }
        })
        .await;
    }
}
