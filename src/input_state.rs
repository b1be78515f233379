//! Tracks whether inbound audio recently contains speech and notifies
//! listeners on SILENCE/SPEAKING transitions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    Silence,
    Speaking,
}

impl InputStatus {
    pub fn is_silence(self) -> bool {
        self == InputStatus::Silence
    }

    pub fn is_speaking(self) -> bool {
        self == InputStatus::Speaking
    }
}

type Listener = Arc<dyn Fn(InputStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Observable silence/speaking state machine with voice hysteresis and a
/// silence timeout.
pub struct InputState {
    voice_hysteresis_ms: u64,
    silence_timeout_ms: u64,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Listener>>,
}

struct Inner {
    status: InputStatus,
    voice_detected_from_ms: Option<u64>,
    voice_detected_last_ms: u64,
}

impl InputState {
    pub fn new(voice_hysteresis_ms: u64, silence_timeout_ms: u64) -> Self {
        Self {
            voice_hysteresis_ms,
            silence_timeout_ms,
            inner: Mutex::new(Inner {
                status: InputStatus::Silence,
                voice_detected_from_ms: None,
                voice_detected_last_ms: 0,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub async fn status(&self) -> InputStatus {
        self.inner.lock().await.status
    }

    /// Registers a listener invoked, in registration order, on every state
    /// transition.
    pub async fn add_listener<F, Fut>(&self, listener: F)
    where
        F: Fn(InputStatus) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.listeners.lock().await.push(Arc::new(move |status| Box::pin(listener(status))));
    }

    async fn notify_listeners(&self, status: InputStatus) {
        let listeners = self.listeners.lock().await.clone();
        for listener in listeners {
            listener(status).await;
        }
    }

    /// Records voice activity at `now_ms`. Returns `true` if this call
    /// transitioned SILENCE -> SPEAKING.
    pub async fn on_voice_detected(&self, now_ms: u64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.status.is_silence() {
            let from = *inner.voice_detected_from_ms.get_or_insert(now_ms);
            if now_ms.saturating_sub(from) < self.voice_hysteresis_ms {
                return false;
            }
            inner.status = InputStatus::Speaking;
            inner.voice_detected_last_ms = now_ms;
            drop(inner);
            self.notify_listeners(InputStatus::Speaking).await;
            return true;
        }
        inner.voice_detected_last_ms = now_ms;
        false
    }

    /// Records the absence of voice at `now_ms`. Returns `true` if this call
    /// transitioned SPEAKING -> SILENCE.
    pub async fn on_silence_detected(&self, now_ms: u64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.status.is_speaking() && now_ms.saturating_sub(inner.voice_detected_last_ms) > self.silence_timeout_ms
        {
            inner.status = InputStatus::Silence;
            inner.voice_detected_from_ms = None;
            drop(inner);
            self.notify_listeners(InputStatus::Silence).await;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn voice_must_sustain_hysteresis_before_transitioning() {
        let state = InputState::new(100, 500);
        assert!(!state.on_voice_detected(0).await);
        assert_eq!(state.status().await, InputStatus::Silence);
        assert!(!state.on_voice_detected(50).await);
        assert!(state.on_voice_detected(150).await);
        assert_eq!(state.status().await, InputStatus::Speaking);
    }

    #[tokio::test]
    async fn silence_requires_timeout_since_last_voice() {
        let state = InputState::new(0, 200);
        assert!(state.on_voice_detected(0).await);
        assert!(!state.on_silence_detected(100).await);
        assert!(state.on_silence_detected(300).await);
        assert_eq!(state.status().await, InputStatus::Silence);
    }

    #[tokio::test]
    async fn listeners_notified_in_registration_order() {
        let state = InputState::new(0, 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let order = order.clone();
            let counter = counter.clone();
            state
                .add_listener(move |_status| {
                    let order = order.clone();
                    let counter = counter.clone();
                    async move {
                        let seq = counter.fetch_add(1, Ordering::SeqCst);
                        order.lock().await.push((i, seq));
                    }
                })
                .await;
        }

        state.on_voice_detected(0).await;
        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec![(0, 0), (1, 1), (2, 2)]);
    }
}
