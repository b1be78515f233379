//! Error taxonomy for the streaming data plane.

use thiserror::Error;

/// Errors surfaced by the audio kernel, event bus, adapters, and dispatcher.
///
/// Transport and overflow conditions are recovered internally (reconnect,
/// drop/block); they are modeled here so callers can log or assert on them in
/// tests.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    #[error("audio decoding failed: {0}")]
    AudioDecoding(String),

    #[error("audio transcoding failed: {0}")]
    AudioTranscoding(String),

    #[error("transport dropped: {0}")]
    TransportDropped(String),

    #[error("handler fault: {0}")]
    HandlerFault(String),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
