//! Wires the buses, adapters, and handlers into a running gateway and owns
//! its startup/shutdown lifecycle.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use serde_json::Value;

use crate::audio::rms_pcm16;
use crate::barge_in::{BargeInGate, BargeInManager};
use crate::bus::{EventBus, HandlerSettings};
use crate::config::GatewayConfig;
use crate::egress::AcsEgressAdapter;
use crate::envelope::Envelope;
use crate::ingress::{AcsIngressAdapter, ReconnectPolicy};
use crate::input_state::InputState;
use crate::playout::PlayoutStore;
use crate::provider::acs_publisher::AcsAudioPublisher;
use crate::provider::dispatch::{ProviderOutputDispatcher, ProviderOutputHandler};
use crate::provider::handlers::{AudioDeltaHandler, AudioDoneHandler, ControlHandler, TranscriptHandler};
use crate::provider::ProviderOutputEvent;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

const ACS_INBOUND_VAD_SLOT: &str = "vad";
const PROVIDER_OUTPUT_SLOT: &str = "provider_output";
const ACS_OUTBOUND_EGRESS_SLOT: &str = "egress_forward";

/// Owns every long-lived component of the streaming data plane: the three
/// typed event buses, the ACS ingress/egress adapters, the per-session
/// input-state machine and barge-in gate, and the playout store.
///
/// Handler registration happens once, synchronously, during construction
/// (mirroring `server/service.py`'s fixed registration order) so no bus ever
/// runs without its handlers attached.
pub struct GatewayService {
    acs_inbound_bus: Arc<EventBus<Envelope>>,
    provider_output_bus: Arc<EventBus<ProviderOutputEvent>>,
    acs_outbound_bus: Arc<EventBus<Value>>,
    ingress_adapter: Arc<AcsIngressAdapter>,
    egress_adapter: Arc<AcsEgressAdapter>,
    input_state: Arc<InputState>,
    barge_in_gate: Arc<BargeInGate>,
    barge_in_manager: Arc<BargeInManager>,
    #[allow(dead_code)]
    playout_store: Arc<PlayoutStore>,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();

        let ingress_adapter = Arc::new(AcsIngressAdapter::new(
            config.acs_ingress_url.clone(),
            ReconnectPolicy {
                initial_delay_ms: config.ingress_reconnect_initial_ms,
                max_delay_ms: config.ingress_reconnect_max_ms,
            },
        ));
        let egress_adapter = Arc::new(AcsEgressAdapter::new(config.acs_egress_url.clone(), config.egress_reconnect_delay_ms));

        let mut acs_outbound_bus: EventBus<Value> = EventBus::new("acs_outbound_bus");
        let egress_for_forward = egress_adapter.clone();
        acs_outbound_bus.register_handler(
            HandlerSettings::new(ACS_OUTBOUND_EGRESS_SLOT, config.bus_queue_capacity, config.bus_overflow_policy),
            move |payload: Arc<Value>| {
                let egress = egress_for_forward.clone();
                async move { egress.send(&payload).await }
            },
        );
        let acs_outbound_bus = Arc::new(acs_outbound_bus);

        let playout_store = Arc::new(PlayoutStore::new());
        let barge_in_manager = Arc::new(BargeInManager::new());
        let publisher = Arc::new(AcsAudioPublisher::new(acs_outbound_bus.clone()));

        let audio_delta_handler = Arc::new(AudioDeltaHandler::new(
            publisher.clone(),
            playout_store.clone(),
            config.outbound_target_format(),
            config.frame_ms,
            config.warm_up_watermark_ms,
            barge_in_manager.clone(),
        ));
        let audio_done_handler = Arc::new(AudioDoneHandler::new(
            audio_delta_handler.clone(),
            playout_store.clone(),
            publisher.clone(),
            barge_in_manager.clone(),
        ));
        let control_handler = Arc::new(ControlHandler::new(
            acs_outbound_bus.clone(),
            audio_delta_handler.clone(),
            playout_store.clone(),
            barge_in_manager.clone(),
        ));
        let transcript_handler = Arc::new(TranscriptHandler::new(acs_outbound_bus.clone()));
        let handlers: Vec<Arc<dyn ProviderOutputHandler>> = vec![audio_done_handler, control_handler, transcript_handler, audio_delta_handler];
        let dispatcher = Arc::new(ProviderOutputDispatcher::new(handlers));

        let mut provider_output_bus: EventBus<ProviderOutputEvent> = EventBus::new("provider_output_bus");
        provider_output_bus.register_handler(
            HandlerSettings::new(PROVIDER_OUTPUT_SLOT, config.bus_queue_capacity, config.bus_overflow_policy)
                .with_concurrency(config.bus_handler_concurrency),
            move |event: Arc<ProviderOutputEvent>| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.dispatch(event).await }
            },
        );
        let provider_output_bus = Arc::new(provider_output_bus);

        let input_state = Arc::new(InputState::new(config.voice_hysteresis_ms, config.silence_timeout_ms));

        let mut acs_inbound_bus: EventBus<Envelope> = EventBus::new("acs_inbound_bus");
        let vad_input_state = input_state.clone();
        let rms_voice_threshold = config.rms_voice_threshold;
        acs_inbound_bus.register_handler(
            HandlerSettings::new(ACS_INBOUND_VAD_SLOT, config.bus_queue_capacity, config.bus_overflow_policy),
            move |envelope: Arc<Envelope>| {
                let input_state = vad_input_state.clone();
                async move {
                    if !envelope.kind.starts_with("audio") {
                        return;
                    }
                    let Some(audio_b64) = envelope.payload.get("audio_b64").and_then(Value::as_str) else {
                        return;
                    };
                    let Ok(pcm) = base64_decode(audio_b64) else {
                        return;
                    };
                    let energy = rms_pcm16(&pcm, 1);
                    let now = now_ms();
                    if energy >= rms_voice_threshold as f64 {
                        input_state.on_voice_detected(now).await;
                    } else {
                        input_state.on_silence_detected(now).await;
                    }
                }
            },
        );
        let acs_inbound_bus = Arc::new(acs_inbound_bus);

        let barge_in_gate = Arc::new(BargeInGate::new(
            provider_output_bus.clone(),
            PROVIDER_OUTPUT_SLOT.to_string(),
            playout_store.clone(),
            config.gate_mode,
            session_id,
            barge_in_manager.clone(),
        ));

        Self {
            acs_inbound_bus,
            provider_output_bus,
            acs_outbound_bus,
            ingress_adapter,
            egress_adapter,
            input_state,
            barge_in_gate,
            barge_in_manager,
            playout_store,
        }
    }

    /// Attaches the barge-in gate as an input-state listener. Call once
    /// before `run_ingress`.
    pub async fn attach_barge_in(&self) {
        self.barge_in_gate.clone().attach(self.input_state.clone()).await;
    }

    /// Runs the ingress receive loop, publishing each envelope onto the
    /// inbound bus, until the ingress adapter is closed.
    pub async fn run_ingress(&self) {
        let mut envelopes = self.ingress_adapter.clone().envelopes();
        while let Some(envelope) = envelopes.recv().await {
            self.acs_inbound_bus.publish(envelope).await;
        }
    }

    /// Hands a normalized provider output event to the provider-output bus.
    pub async fn publish_provider_output(&self, event: ProviderOutputEvent) {
        self.provider_output_bus.publish(event).await;
    }

    pub fn input_state(&self) -> Arc<InputState> {
        self.input_state.clone()
    }

    pub fn barge_in_manager(&self) -> Arc<BargeInManager> {
        self.barge_in_manager.clone()
    }

    pub async fn shutdown(&self) {
        info!("shutting down gateway service");
        self.acs_inbound_bus.shutdown().await;
        self.provider_output_bus.shutdown().await;
        self.acs_outbound_bus.shutdown().await;
        self.barge_in_gate.shutdown();
        self.ingress_adapter.close().await;
        self.egress_adapter.close().await;
    }
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s)
}
