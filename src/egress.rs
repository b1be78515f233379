//! Maintains the ACS egress WebSocket connection and sends outbound JSON
//! payloads, reconnecting with backoff on failure.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to ACS's egress WebSocket and sends outbound JSON payloads,
/// reconnecting and retrying with linear-then-capped backoff on failure.
pub struct AcsEgressAdapter {
    url: String,
    ws: Mutex<Option<WsStream>>,
    reconnect_delay_ms: u64,
}

impl AcsEgressAdapter {
    pub fn new(url: impl Into<String>, reconnect_delay_ms: u64) -> Self {
        Self {
            url: url.into(),
            ws: Mutex::new(None),
            reconnect_delay_ms,
        }
    }

    async fn connect(&self) -> Result<(), tungstenite::Error> {
        let mut ws = self.ws.lock().await;
        if ws.is_some() {
            return Ok(());
        }
        let (stream, _) = connect_async(&self.url).await?;
        *ws = Some(stream);
        info!("connected to ACS egress websocket");
        Ok(())
    }

    /// Sends `payload`, retrying with backoff on any failure until it
    /// succeeds.
    pub async fn send(&self, payload: &Value) {
        let mut attempt: u32 = 0;
        loop {
            if let Err(e) = self.connect().await {
                attempt += 1;
                warn!("failed to connect to egress; attempt={attempt}: {e}");
                self.backoff(attempt).await;
                continue;
            }

            let text = payload.to_string();
            let mut ws = self.ws.lock().await;
            let result = match ws.as_mut() {
                Some(stream) => stream.send(tungstenite::Message::Text(text.into())).await,
                None => continue,
            };
            match result {
                Ok(()) => return,
                Err(e) => {
                    *ws = None;
                    attempt += 1;
                    warn!("failed to send to egress; attempt={attempt}: {e}");
                    drop(ws);
                    self.backoff(attempt).await;
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay_ms = (self.reconnect_delay_ms * attempt as u64).min(10_000);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    pub async fn close(&self) {
        let mut ws = self.ws.lock().await;
        if let Some(mut stream) = ws.take() {
            let _ = stream.close(None).await;
            let _ = stream.next().await;
            info!("closed ACS egress websocket");
        }
    }
}
