//! In-process streaming data plane for a real-time bidirectional speech
//! translation gateway: typed event buses, the ACS ingress/egress adapters,
//! per-call outbound audio assembly, the input-state/barge-in machinery,
//! and the PCM audio kernel they all build on.

pub mod audio;
pub mod barge_in;
pub mod bus;
pub mod config;
pub mod egress;
pub mod envelope;
pub mod error;
pub mod ingress;
pub mod input_state;
pub mod playback_state;
pub mod playout;
pub mod provider;
pub mod service;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use service::GatewayService;
