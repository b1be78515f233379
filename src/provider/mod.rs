//! Normalized events produced by a translation provider (audio deltas,
//! completion, control actions, transcript deltas) and the per-provider
//! native audio format table.

pub mod acs_publisher;
pub mod dispatch;
pub mod handlers;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::AudioFormat;

/// Identifies which upstream translation provider produced an event, used
/// only to resolve that provider's native audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    VoiceLive,
    SpeechTranslator,
    LiveInterpreter,
    Generic,
}

impl ProviderKind {
    pub fn from_str(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "voice_live" | "voicelive" | "realtime" | "openai_realtime" => ProviderKind::VoiceLive,
            "speech_translator" | "speechtranslator" => ProviderKind::SpeechTranslator,
            "live_interpreter" | "liveinterpreter" => ProviderKind::LiveInterpreter,
            _ => ProviderKind::Generic,
        }
    }

    /// Native input/output PCM format for this provider.
    pub fn default_format(self) -> AudioFormat {
        match self {
            ProviderKind::VoiceLive => AudioFormat::new(24_000, 1),
            ProviderKind::SpeechTranslator => AudioFormat::new(16_000, 1),
            ProviderKind::LiveInterpreter => AudioFormat::new(16_000, 1),
            ProviderKind::Generic => AudioFormat::new(16_000, 1),
        }
    }
}

/// One event emitted by a provider's output stream: an audio delta, an
/// audio-done completion, a control action, or a transcript delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutputEvent {
    pub event_type: String,
    pub session_id: String,
    pub participant_id: Option<String>,
    pub commit_id: Option<String>,
    pub stream_id: Option<String>,
    pub provider: String,
    pub payload: HashMap<String, Value>,
}

impl ProviderOutputEvent {
    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::from_str(&self.provider)
    }
}
