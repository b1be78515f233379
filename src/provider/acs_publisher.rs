//! Builds and publishes ACS-ready outbound payloads: audio chunks and
//! `audio.done` completion notices.

use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Value};

use crate::bus::EventBus;

use super::ProviderOutputEvent;

pub struct AcsAudioPublisher {
    bus: Arc<EventBus<Value>>,
}

impl AcsAudioPublisher {
    pub fn new(bus: Arc<EventBus<Value>>) -> Self {
        Self { bus }
    }

    pub async fn publish_audio_chunk(&self, audio_bytes: &[u8]) {
        let data = base64::engine::general_purpose::STANDARD.encode(audio_bytes);
        let payload = json!({
            "kind": "audioData",
            "audioData": {
                "data": data,
                "timestamp": Value::Null,
                "participant": Value::Null,
                "isSilent": false,
            },
            "stopAudio": Value::Null,
        });
        self.bus.publish(payload).await;
    }

    pub async fn publish_audio_done(&self, event: &ProviderOutputEvent, reason: &str, error: Option<&str>) {
        let payload = json!({
            "type": "audio.done",
            "session_id": event.session_id,
            "participant_id": event.participant_id,
            "commit_id": event.commit_id,
            "stream_id": event.stream_id,
            "provider": event.provider,
            "reason": reason,
            "error": error,
        });
        self.bus.publish(payload).await;
    }
}
