//! Handles `control` events from providers, currently just `stop_audio`.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};

use crate::barge_in::BargeInManager;
use crate::bus::EventBus;
use crate::playout;
use crate::playout::PlayoutStore;

use super::super::dispatch::ProviderOutputHandler;
use super::super::ProviderOutputEvent;
use super::audio_delta::AudioDeltaHandler;

/// On `action=stop_audio`, clears the stream's buffered audio and publishes
/// an ACS `control.stop_audio` notice. Any other action is ignored.
pub struct ControlHandler {
    acs_outbound_bus: Arc<EventBus<Value>>,
    audio_delta_handler: Arc<AudioDeltaHandler>,
    store: Arc<PlayoutStore>,
    barge_in_manager: Arc<BargeInManager>,
}

impl ControlHandler {
    pub fn new(
        acs_outbound_bus: Arc<EventBus<Value>>,
        audio_delta_handler: Arc<AudioDeltaHandler>,
        store: Arc<PlayoutStore>,
        barge_in_manager: Arc<BargeInManager>,
    ) -> Self {
        Self {
            acs_outbound_bus,
            audio_delta_handler,
            store,
            barge_in_manager,
        }
    }
}

#[async_trait]
impl ProviderOutputHandler for ControlHandler {
    fn can_handle(&self, event: &ProviderOutputEvent) -> bool {
        event.event_type == "control"
    }

    async fn handle(&self, event: Arc<ProviderOutputEvent>) {
        let action = event.payload.get("action").and_then(Value::as_str);
        if action != Some("stop_audio") {
            debug!("control event ignored (action={action:?})");
            return;
        }

        let key = playout::stream_key(&event);
        if let Some(stream) = self.store.get(&key).await {
            stream.clear().await;
        }
        self.audio_delta_handler.clear_stream(&key).await;
        self.barge_in_manager.clear_playback(&key).await;

        let payload = json!({
            "type": "control.stop_audio",
            "session_id": event.session_id,
            "participant_id": event.participant_id,
            "commit_id": event.commit_id,
            "stream_id": event.stream_id,
            "provider": event.provider,
            "detail": event.payload.get("detail"),
        });
        self.acs_outbound_bus.publish(payload).await;
        info!("published stop_audio control for {key}");
    }
}
