//! Publishes partial and final translation text to the ACS-outbound bus.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use serde_json::{json, Value};

use crate::bus::EventBus;

use super::super::dispatch::ProviderOutputHandler;
use super::super::ProviderOutputEvent;

/// Handles both `transcript.delta` (partial) and `transcript.done` (final)
/// provider events, publishing the corresponding translation text payload.
pub struct TranscriptHandler {
    acs_outbound_bus: Arc<EventBus<Value>>,
}

impl TranscriptHandler {
    pub fn new(acs_outbound_bus: Arc<EventBus<Value>>) -> Self {
        Self { acs_outbound_bus }
    }
}

#[async_trait]
impl ProviderOutputHandler for TranscriptHandler {
    fn can_handle(&self, event: &ProviderOutputEvent) -> bool {
        event.event_type == "transcript.delta" || event.event_type == "transcript.done"
    }

    async fn handle(&self, event: Arc<ProviderOutputEvent>) {
        let text = event.payload.get("text").and_then(Value::as_str);
        let Some(text) = text else {
            debug!("transcript event missing text: {:?}", event.payload);
            return;
        };

        let kind = if event.event_type == "transcript.done" {
            "translation.text_done"
        } else {
            "translation.text_delta"
        };

        let payload = json!({
            "type": kind,
            "session_id": event.session_id,
            "participant_id": event.participant_id,
            "commit_id": event.commit_id,
            "stream_id": event.stream_id,
            "provider": event.provider,
            "text": text,
            "timestamp_ms": Utc::now().timestamp_millis(),
        });
        self.acs_outbound_bus.publish(payload).await;
        info!(
            "published {kind} for session={} participant={:?}",
            event.session_id, event.participant_id
        );
    }
}
