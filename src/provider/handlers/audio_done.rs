//! Drains a stream's playout buffer and publishes its completion notice.

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::barge_in::BargeInManager;
use crate::playout;
use crate::playout::PlayoutStore;

use super::super::acs_publisher::AcsAudioPublisher;
use super::super::dispatch::ProviderOutputHandler;
use super::super::ProviderOutputEvent;
use super::audio_delta::AudioDeltaHandler;

/// Pads the stream to a frame boundary, waits for playout to drain, and
/// publishes the `audio.done` notice before removing the stream.
pub struct AudioDoneHandler {
    audio_delta_handler: Arc<AudioDeltaHandler>,
    store: Arc<PlayoutStore>,
    publisher: Arc<AcsAudioPublisher>,
    barge_in_manager: Arc<BargeInManager>,
}

impl AudioDoneHandler {
    pub fn new(
        audio_delta_handler: Arc<AudioDeltaHandler>,
        store: Arc<PlayoutStore>,
        publisher: Arc<AcsAudioPublisher>,
        barge_in_manager: Arc<BargeInManager>,
    ) -> Self {
        Self {
            audio_delta_handler,
            store,
            publisher,
            barge_in_manager,
        }
    }
}

#[async_trait]
impl ProviderOutputHandler for AudioDoneHandler {
    fn can_handle(&self, event: &ProviderOutputEvent) -> bool {
        event.event_type == "audio.done"
    }

    async fn handle(&self, event: Arc<ProviderOutputEvent>) {
        let key = playout::stream_key(&event);
        let frame_bytes = self.audio_delta_handler.frame_bytes();
        let stream = self
            .store
            .get_or_create(&key, self.audio_delta_handler.target_format(), frame_bytes, self.audio_delta_handler.warm_up_bytes())
            .await;

        let drained = self.audio_delta_handler.clear_stream(&key).await;
        if !drained.is_empty() {
            stream.extend(&drained).await;
        }
        stream.mark_done().await;
        playout::wait(&stream).await;

        let reason = event.payload.get("reason").and_then(Value::as_str).unwrap_or("completed");
        let error = event.payload.get("error").and_then(Value::as_str);
        self.publisher.publish_audio_done(&event, reason, error).await;

        self.store.remove(&key).await;
        self.barge_in_manager.clear_playback(&key).await;
        info!(
            "audio stream completed for session={} participant={:?} commit={:?}",
            event.session_id, event.participant_id, event.commit_id
        );
    }
}
