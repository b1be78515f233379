//! Runtime configuration, loaded from environment variables so the gateway
//! is deployable across environments without code changes.

use crate::audio::AudioFormat;
use crate::barge_in::OutboundGateMode;
use crate::bus::OverflowPolicy;
use crate::provider::ProviderKind;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_overflow_policy(key: &str, default: OverflowPolicy) -> OverflowPolicy {
    match std::env::var(key).ok().as_deref() {
        Some("drop_newest") => OverflowPolicy::DropNewest,
        Some("drop_oldest") => OverflowPolicy::DropOldest,
        Some("block") => OverflowPolicy::Block,
        _ => default,
    }
}

/// Runtime configuration for the streaming data plane. Every field has a
/// default so the gateway can start without any environment configured, the
/// same fallback posture the test harness config takes.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub acs_ingress_url: String,
    pub acs_egress_url: String,
    pub ingress_reconnect_initial_ms: u64,
    pub ingress_reconnect_max_ms: u64,
    pub egress_reconnect_delay_ms: u64,

    pub bus_queue_capacity: usize,
    pub bus_overflow_policy: OverflowPolicy,
    pub bus_handler_concurrency: usize,

    pub frame_ms: u64,
    pub warm_up_watermark_ms: u64,

    pub voice_hysteresis_ms: u64,
    pub silence_timeout_ms: u64,
    pub rms_voice_threshold: f32,

    pub gate_mode: OutboundGateMode,
    pub outbound_provider: ProviderKind,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            acs_ingress_url: env_string("ACS_INGRESS_URL", "ws://localhost:8000/ingress"),
            acs_egress_url: env_string("ACS_EGRESS_URL", "ws://localhost:8000/egress"),
            ingress_reconnect_initial_ms: env_u64("INGRESS_RECONNECT_INITIAL_MS", 800),
            ingress_reconnect_max_ms: env_u64("INGRESS_RECONNECT_MAX_MS", 30_000),
            egress_reconnect_delay_ms: env_u64("EGRESS_RECONNECT_DELAY_MS", 500),

            bus_queue_capacity: env_usize("BUS_QUEUE_CAPACITY", 256),
            bus_overflow_policy: env_overflow_policy("BUS_OVERFLOW_POLICY", OverflowPolicy::DropOldest),
            bus_handler_concurrency: env_usize("BUS_HANDLER_CONCURRENCY", 2),

            frame_ms: env_u64("OUTBOUND_FRAME_MS", 20),
            warm_up_watermark_ms: env_u64("PLAYOUT_WARM_UP_WATERMARK_MS", 80),

            voice_hysteresis_ms: env_u64("VOICE_HYSTERESIS_MS", 120),
            silence_timeout_ms: env_u64("SILENCE_TIMEOUT_MS", 600),
            rms_voice_threshold: env_string("RMS_VOICE_THRESHOLD", "400").parse().unwrap_or(400.0),

            gate_mode: std::env::var("BARGE_IN_GATE_MODE")
                .ok()
                .map(|v| OutboundGateMode::from_value(Some(&v)))
                .unwrap_or(OutboundGateMode::PauseAndBuffer),
            outbound_provider: ProviderKind::from_str(&env_string("OUTBOUND_PROVIDER", "generic")),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from the process environment. `debug_wire`
    /// controls whether raw envelope payloads are logged at debug level.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn debug_wire(&self) -> bool {
        env_bool("GATEWAY_DEBUG_WIRE", false)
    }

    /// PCM format outbound audio is transcoded to before reaching ACS.
    pub fn outbound_target_format(&self) -> AudioFormat {
        self.outbound_provider.default_format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_populated_without_any_env_vars() {
        let config = GatewayConfig::default();
        assert_eq!(config.frame_ms, 20);
        assert_eq!(config.bus_queue_capacity, 256);
        assert!(matches!(config.gate_mode, OutboundGateMode::PauseAndBuffer));
    }
}
