//! Gates outbound provider audio against the caller's input state so a
//! caller speaking over playback can interrupt it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::bus::EventBus;
use crate::input_state::{InputState, InputStatus};
use crate::playout::PlayoutStore;
use crate::provider::ProviderOutputEvent;

/// How outbound provider audio reacts to the caller starting to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundGateMode {
    /// Audio keeps flowing regardless of input state.
    PlayThrough,
    /// Pause the downstream handler; its bus queue buffers up to its bound.
    PauseAndBuffer,
    /// Pause the downstream handler and drop all buffered playout audio.
    PauseAndDrop,
}

impl OutboundGateMode {
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("pause_and_buffer") => OutboundGateMode::PauseAndBuffer,
            Some("pause_and_drop") => OutboundGateMode::PauseAndDrop,
            Some("play_through") => OutboundGateMode::PlayThrough,
            Some(other) => {
                warn!("unknown gate mode '{other}', defaulting to play_through");
                OutboundGateMode::PlayThrough
            }
            None => OutboundGateMode::PlayThrough,
        }
    }

    pub fn is_play_through(self) -> bool {
        self == OutboundGateMode::PlayThrough
    }

    pub fn is_pause_and_buffer(self) -> bool {
        self == OutboundGateMode::PauseAndBuffer
    }

    pub fn is_pause_and_drop(self) -> bool {
        self == OutboundGateMode::PauseAndDrop
    }
}

/// Subscribes to [`InputState`] transitions and pauses/resumes/clears the
/// downstream outbound-audio handler slot and playout streams accordingly.
/// Transitions are idempotent: rapid flicker cannot double-pause or resume
/// before a pause has taken effect.
pub struct BargeInGate {
    gated_bus: Arc<EventBus<ProviderOutputEvent>>,
    downstream_handler_name: String,
    playout_store: Arc<PlayoutStore>,
    gate_mode: OutboundGateMode,
    session_id: String,
    barge_in_manager: Arc<BargeInManager>,
}

impl BargeInGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gated_bus: Arc<EventBus<ProviderOutputEvent>>,
        downstream_handler_name: impl Into<String>,
        playout_store: Arc<PlayoutStore>,
        gate_mode: OutboundGateMode,
        session_id: impl Into<String>,
        barge_in_manager: Arc<BargeInManager>,
    ) -> Self {
        Self {
            gated_bus,
            downstream_handler_name: downstream_handler_name.into(),
            playout_store,
            gate_mode,
            session_id: session_id.into(),
            barge_in_manager,
        }
    }

    /// Registers this gate's playout-clearing callback on `barge_in_manager`
    /// and attaches the gate as an [`InputState`] listener. Call once per
    /// session.
    pub async fn attach(self: Arc<Self>, input_state: Arc<InputState>) {
        let store_for_clear = self.playout_store.clone();
        self.barge_in_manager
            .register_buffer_clearer(Arc::new(move |buffer_key: &str| {
                let store = store_for_clear.clone();
                let buffer_key = buffer_key.to_string();
                tokio::spawn(async move {
                    if let Some(stream) = store.get(&buffer_key).await {
                        stream.pause().await;
                        stream.clear().await;
                    }
                });
            }))
            .await;

        let this = self.clone();
        input_state
            .add_listener(move |status| {
                let this = this.clone();
                async move { this.on_input_state_changed(status).await }
            })
            .await;
    }

    async fn on_input_state_changed(&self, status: InputStatus) {
        if self.gate_mode.is_play_through() {
            return;
        }
        match status {
            InputStatus::Speaking => self.on_speaking_started().await,
            InputStatus::Silence => self.on_silence_resumed().await,
        }
    }

    async fn on_speaking_started(&self) {
        self.gated_bus.pause(&self.downstream_handler_name);
        info!(
            "pause({:?}): downstream handler paused session={}",
            self.gate_mode, self.session_id
        );

        if self.gate_mode.is_pause_and_drop() {
            let affected = self.barge_in_manager.stop_for_barge_in(&self.session_id).await;
            info!("drop({:?}): cleared {} active stream(s) session={}", self.gate_mode, affected.len(), self.session_id);
        } else if self.gate_mode.is_pause_and_buffer() {
            let keys = self.barge_in_manager.active_keys_for_session(&self.session_id).await;
            self.pause_streams(&keys).await;
        }
    }

    async fn on_silence_resumed(&self) {
        if self.gate_mode.is_pause_and_drop() {
            let cleared = self.gated_bus.clear(&self.downstream_handler_name).await;
            let keys = self.barge_in_manager.active_keys_for_session(&self.session_id).await;
            self.barge_in_manager.unmute(&keys).await;
            info!(
                "drop({:?}): cleared {cleared} queued events session={}",
                self.gate_mode, self.session_id
            );
        }
        self.gated_bus.resume(&self.downstream_handler_name);
        let keys = self.barge_in_manager.active_keys_for_session(&self.session_id).await;
        self.resume_streams(&keys).await;
        info!(
            "resume({:?}): downstream handler and playout resumed session={}",
            self.gate_mode, self.session_id
        );
    }

    async fn pause_streams(&self, keys: &[String]) {
        for key in keys {
            if let Some(stream) = self.playout_store.get(key).await {
                stream.pause().await;
            }
        }
    }

    async fn resume_streams(&self, keys: &[String]) {
        for key in keys {
            if let Some(stream) = self.playout_store.get(key).await {
                stream.resume().await;
            }
        }
    }

    /// Best-effort: resumes the downstream handler on teardown.
    pub fn shutdown(&self) {
        self.gated_bus.resume(&self.downstream_handler_name);
    }
}

#[derive(Debug, Clone)]
struct ActivePlayback {
    session_id: String,
    #[allow(dead_code)]
    participant_id: Option<String>,
    #[allow(dead_code)]
    commit_id: Option<String>,
    #[allow(dead_code)]
    stream_id: Option<String>,
    #[allow(dead_code)]
    provider: String,
}

/// Session-wide coordinator tracking which playback streams are active, so
/// a barge-in can mute and clear exactly the streams for its session.
pub struct BargeInManager {
    active: Mutex<HashMap<String, ActivePlayback>>,
    muted: Mutex<HashSet<String>>,
    clear_buffer: Mutex<Option<Arc<dyn Fn(&str) + Send + Sync>>>,
}

impl Default for BargeInManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BargeInManager {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            muted: Mutex::new(HashSet::new()),
            clear_buffer: Mutex::new(None),
        }
    }

    pub async fn register_buffer_clearer(&self, clear_fn: Arc<dyn Fn(&str) + Send + Sync>) {
        *self.clear_buffer.lock().await = Some(clear_fn);
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn register_playback(
        &self,
        buffer_key: String,
        session_id: String,
        participant_id: Option<String>,
        commit_id: Option<String>,
        stream_id: Option<String>,
        provider: String,
    ) {
        self.active.lock().await.insert(
            buffer_key,
            ActivePlayback {
                session_id,
                participant_id,
                commit_id,
                stream_id,
                provider,
            },
        );
    }

    pub async fn clear_playback(&self, buffer_key: &str) {
        self.active.lock().await.remove(buffer_key);
        self.muted.lock().await.remove(buffer_key);
    }

    /// Marks every active stream for `session_id` as muted and clears its
    /// buffer, returning the affected buffer keys.
    pub async fn stop_for_barge_in(&self, session_id: &str) -> Vec<String> {
        let mut active = self.active.lock().await;
        let mut muted = self.muted.lock().await;
        let affected: Vec<String> = active
            .iter()
            .filter(|(key, playback)| playback.session_id == session_id && !muted.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &affected {
            muted.insert(key.clone());
        }
        drop(active);
        drop(muted);

        let clearer = self.clear_buffer.lock().await.clone();
        if let Some(clearer) = clearer {
            for key in &affected {
                clearer(key);
            }
        } else {
            error!("barge-in fired with no buffer clearer registered");
        }
        affected
    }

    pub async fn is_muted(&self, buffer_key: &str) -> bool {
        self.muted.lock().await.contains(buffer_key)
    }

    /// Returns the buffer keys currently registered as active playback for
    /// `session_id`, without mutating mute state.
    pub async fn active_keys_for_session(&self, session_id: &str) -> Vec<String> {
        self.active
            .lock()
            .await
            .iter()
            .filter(|(_, playback)| playback.session_id == session_id)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Clears the muted marker for each of `keys`, allowing a later
    /// barge-in to fire on them again.
    pub async fn unmute(&self, keys: &[String]) {
        let mut muted = self.muted.lock().await;
        for key in keys {
            muted.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_for_barge_in_mutes_once_and_returns_affected_keys() {
        let mgr = BargeInManager::new();
        mgr.register_playback("k1".into(), "s1".into(), None, None, None, "p".into()).await;
        mgr.register_playback("k2".into(), "s2".into(), None, None, None, "p".into()).await;

        let affected = mgr.stop_for_barge_in("s1").await;
        assert_eq!(affected, vec!["k1".to_string()]);
        assert!(mgr.is_muted("k1").await);
        assert!(!mgr.is_muted("k2").await);

        let affected_again = mgr.stop_for_barge_in("s1").await;
        assert!(affected_again.is_empty());
    }

    #[test]
    fn gate_mode_parses_known_values_and_falls_back() {
        assert_eq!(OutboundGateMode::from_value(Some("pause_and_drop")), OutboundGateMode::PauseAndDrop);
        assert_eq!(OutboundGateMode::from_value(Some("bogus")), OutboundGateMode::PlayThrough);
        assert_eq!(OutboundGateMode::from_value(None), OutboundGateMode::PlayThrough);
    }
}
