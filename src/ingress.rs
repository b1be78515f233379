//! Maintains the ACS ingress WebSocket connection, reconnecting with
//! exponential backoff, and turns each inbound frame into an [`Envelope`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use log::{info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite};
use uuid::Uuid;

use crate::envelope::Envelope;

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 800,
            max_delay_ms: 30_000,
        }
    }
}

fn is_permanent_connect_error(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Http(resp) => matches!(resp.status().as_u16(), 401 | 403),
        other => {
            let text = other.to_string();
            text.contains("401") || text.contains("403")
        }
    }
}

/// Connects to ACS's ingress WebSocket and turns each inbound JSON frame
/// into a sequence-numbered [`Envelope`], reconnecting on transport loss.
pub struct AcsIngressAdapter {
    url: String,
    reconnect: ReconnectPolicy,
    ingress_id: String,
    sequence: AtomicU64,
    shutdown: Mutex<bool>,
}

impl AcsIngressAdapter {
    pub fn new(url: impl Into<String>, reconnect: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            reconnect,
            ingress_id: Uuid::new_v4().to_string(),
            sequence: AtomicU64::new(0),
            shutdown: Mutex::new(false),
        }
    }

    /// Spawns the receive loop, returning a channel of envelopes. The loop
    /// reconnects with exponential backoff until `close` is called.
    pub fn envelopes(self: std::sync::Arc<Self>) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            self.receive_loop(tx).await;
        });
        rx
    }

    async fn receive_loop(&self, tx: mpsc::Sender<Envelope>) {
        let mut backoff_ms = self.reconnect.initial_delay_ms;
        loop {
            if *self.shutdown.lock().await {
                return;
            }
            match connect_async(&self.url).await {
                Ok((ws_stream, _)) => {
                    info!("connected to ACS ingress websocket id={}", self.ingress_id);
                    backoff_ms = self.reconnect.initial_delay_ms;
                    let (_, mut reader) = ws_stream.split();
                    while let Some(msg) = reader.next().await {
                        match msg {
                            Ok(tungstenite::Message::Text(raw)) => {
                                self.handle_frame(&raw, &tx).await;
                            }
                            Ok(tungstenite::Message::Close(_)) | Err(_) => {
                                warn!("ACS ingress connection closed; reconnecting");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    if is_permanent_connect_error(&e) {
                        warn!("ACS ingress connect rejected permanently: {e}");
                        return;
                    }
                    warn!("ACS ingress connect failed: {e}");
                }
            }

            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(self.reconnect.max_delay_ms);
        }
    }

    async fn handle_frame(&self, raw: &str, tx: &mpsc::Sender<Envelope>) {
        let frame: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => {
                warn!("skipping non-JSON ACS frame");
                return;
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = Envelope::from_acs_frame(&frame, sequence, &self.ingress_id);
        if let Err(e) = envelope.ensure_audio_metadata() {
            warn!("invalid audio envelope: {e}");
            return;
        }
        let _ = tx.send(envelope).await;
    }

    pub async fn close(&self) {
        *self.shutdown.lock().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors_are_classified_by_status_text() {
        let err = tungstenite::Error::Http(
            tungstenite::http::Response::builder()
                .status(401)
                .body(None)
                .unwrap(),
        );
        assert!(is_permanent_connect_error(&err));
    }
}
