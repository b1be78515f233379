//! The normalized in-process event shape produced at the ACS ingress
//! boundary and carried unchanged through both buses.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::GatewayError;

/// Per-message provenance, attached once at ingress and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub sequence: u64,
    pub received_at_utc: String,
    pub ingress_ws_id: Option<String>,
}

/// A normalized inbound or outbound event. Parsed once at the adapter
/// boundary and immutable after publication to a bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub session_id: String,
    pub participant_id: Option<String>,
    pub scenario_id: Option<String>,
    pub commit_id: Option<String>,
    pub timestamp_utc: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content_type: Option<String>,
    pub payload: HashMap<String, Value>,
    pub raw: Option<Value>,
    pub trace: Option<Trace>,
}

impl Envelope {
    /// Builds an `Envelope` from a raw ACS frame in the official nested wire
    /// shape: a top-level `timestamp`/`direction` plus a `message` object
    /// whose `kind` is `AudioData` (carrying `audioData.{data,
    /// participantRawID|participantId, timestamp, silent}` and optional
    /// `sampleRate`/`channels`/`bitsPerSample`/`format`) or `EndOfStream`,
    /// with anything else treated as a control message.
    pub fn from_acs_frame(frame: &Value, sequence: u64, ingress_ws_id: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        let message = frame.get("message");

        let raw_kind = message
            .and_then(|m| m.get("kind"))
            .or_else(|| message.and_then(|m| m.get("type")))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let mut payload: HashMap<String, Value> = HashMap::new();
        let mut participant_id = None;
        let mut content_type = Some(raw_kind.clone());

        let kind = if raw_kind.eq_ignore_ascii_case("AudioData") {
            if let Some(audio_data) = message.and_then(|m| m.get("audioData")) {
                participant_id = audio_data
                    .get("participantRawID")
                    .or_else(|| audio_data.get("participantId"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(data) = audio_data.get("data").and_then(Value::as_str) {
                    payload.insert("audio_b64".to_string(), Value::String(data.to_string()));
                }
                if let Some(silent) = audio_data.get("silent").and_then(Value::as_bool) {
                    payload.insert("silent".to_string(), Value::Bool(silent));
                }
                if let Some(source_timestamp) = audio_data.get("timestamp") {
                    payload.insert("source_timestamp".to_string(), source_timestamp.clone());
                }
                let has_format_override = audio_data.get("sampleRate").is_some()
                    || audio_data.get("channels").is_some()
                    || audio_data.get("bitsPerSample").is_some()
                    || audio_data.get("format").is_some();
                if has_format_override {
                    payload.insert(
                        "format".to_string(),
                        json!({
                            "sample_rate_hz": audio_data.get("sampleRate").cloned().unwrap_or_else(|| json!(16_000)),
                            "channels": audio_data.get("channels").cloned().unwrap_or_else(|| json!(1)),
                            "bits_per_sample": audio_data.get("bitsPerSample").cloned().unwrap_or_else(|| json!(16)),
                            "format": audio_data.get("format").cloned().unwrap_or_else(|| json!("pcm")),
                        }),
                    );
                }
            }
            "audio".to_string()
        } else if raw_kind.eq_ignore_ascii_case("EndOfStream") {
            "audio.commit".to_string()
        } else {
            content_type = message.and_then(|m| m.get("type")).and_then(Value::as_str).map(str::to_string).or(Some(raw_kind));
            "control".to_string()
        };

        Envelope {
            message_id: frame
                .get("message_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            session_id: frame
                .get("session_id")
                .or_else(|| frame.get("call_id"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| ingress_ws_id.to_string()),
            participant_id,
            scenario_id: frame.get("scenario_id").and_then(Value::as_str).map(str::to_string),
            commit_id: frame.get("commit_id").and_then(Value::as_str).map(str::to_string),
            timestamp_utc: frame
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| now.clone()),
            source: "acs".to_string(),
            kind,
            content_type,
            payload,
            raw: frame.get("raw").cloned(),
            trace: Some(Trace {
                sequence,
                received_at_utc: now,
                ingress_ws_id: Some(ingress_ws_id.to_string()),
            }),
        }
    }

    /// Validates that an `audio*` envelope's `audio_b64` payload field, if
    /// present, decodes as base64. Decoding is not retained; this is a
    /// lightweight validity check only.
    pub fn ensure_audio_metadata(&self) -> Result<(), GatewayError> {
        if !self.kind.starts_with("audio") {
            return Ok(());
        }
        let Some(audio_b64) = self.payload.get("audio_b64").and_then(Value::as_str) else {
            return Ok(());
        };
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(audio_b64)
            .map(|_| ())
            .map_err(|e| GatewayError::AudioDecoding(format!("invalid base64 audio payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_acs_frame_parses_official_audio_data_shape() {
        let frame = json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "direction": "inbound",
            "message": {
                "kind": "AudioData",
                "audioData": {
                    "data": "AAA=",
                    "participantRawID": "participant-1",
                    "timestamp": "123.456",
                    "silent": false,
                },
            },
        });
        let env = Envelope::from_acs_frame(&frame, 1, "ws-1");
        assert_eq!(env.kind, "audio");
        assert_eq!(env.source, "acs");
        assert_eq!(env.participant_id.as_deref(), Some("participant-1"));
        assert_eq!(env.payload.get("audio_b64").and_then(Value::as_str), Some("AAA="));
        assert_eq!(env.payload.get("silent").and_then(Value::as_bool), Some(false));
        assert_eq!(env.trace.unwrap().sequence, 1);
    }

    #[test]
    fn from_acs_frame_falls_back_to_participant_id_key() {
        let frame = json!({
            "message": {"kind": "AudioData", "audioData": {"data": "AAA=", "participantId": "p2"}},
        });
        let env = Envelope::from_acs_frame(&frame, 0, "ws-1");
        assert_eq!(env.participant_id.as_deref(), Some("p2"));
    }

    #[test]
    fn from_acs_frame_parses_optional_format_override() {
        let frame = json!({
            "message": {
                "kind": "AudioData",
                "audioData": {"data": "AAA=", "sampleRate": 24_000, "channels": 2, "bitsPerSample": 16},
            },
        });
        let env = Envelope::from_acs_frame(&frame, 0, "ws-1");
        let format = env.payload.get("format").expect("format override present");
        assert_eq!(format.get("sample_rate_hz").and_then(Value::as_u64), Some(24_000));
        assert_eq!(format.get("channels").and_then(Value::as_u64), Some(2));
    }

    #[test]
    fn from_acs_frame_end_of_stream_maps_to_audio_commit() {
        let frame = json!({"call_id": "call-9", "message": {"kind": "EndOfStream"}});
        let env = Envelope::from_acs_frame(&frame, 0, "ws-1");
        assert_eq!(env.session_id, "call-9");
        assert_eq!(env.kind, "audio.commit");
    }

    #[test]
    fn from_acs_frame_defaults_session_to_ingress_connection() {
        let frame = json!({"message": {"kind": "AudioData", "audioData": {"data": "AAA="}}});
        let env = Envelope::from_acs_frame(&frame, 0, "ws-7");
        assert_eq!(env.session_id, "ws-7");
    }

    #[test]
    fn ensure_audio_metadata_rejects_invalid_base64() {
        let frame = json!({"message": {"kind": "AudioData", "audioData": {"data": "not-base64!!"}}});
        let env = Envelope::from_acs_frame(&frame, 0, "ws-1");
        assert!(env.ensure_audio_metadata().is_err());
    }

    #[test]
    fn ensure_audio_metadata_ignores_non_audio_types() {
        let frame = json!({"message": {"kind": "control", "type": "control.ping"}});
        let env = Envelope::from_acs_frame(&frame, 0, "ws-1");
        assert_eq!(env.kind, "control");
        assert!(env.ensure_audio_metadata().is_ok());
    }
}
