//! Per-stream playback status, driven by outbound audio delivery, provider
//! completion, and barge-in gate transitions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Draining,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub current_response_id: Option<String>,
    pub last_audio_sent_ms: u64,
    pub provider_done: bool,
    pub gate_closed: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current_response_id: None,
            last_audio_sent_ms: 0,
            provider_done: false,
            gate_closed: false,
        }
    }
}

impl PlaybackState {
    pub fn on_outbound_audio_sent(&mut self, now_ms: u64, response_id: Option<String>) {
        self.last_audio_sent_ms = now_ms;
        if let Some(id) = response_id {
            self.current_response_id = Some(id);
        }
        self.provider_done = false;
        self.gate_closed = false;
        self.status = PlaybackStatus::Playing;
    }

    pub fn on_provider_done(&mut self, response_id: Option<String>) {
        if let Some(id) = response_id {
            self.current_response_id = Some(id);
        }
        self.provider_done = true;
        if self.status == PlaybackStatus::Playing {
            self.status = PlaybackStatus::Draining;
        }
    }

    pub fn on_gate_closed(&mut self) {
        self.gate_closed = true;
        self.status = PlaybackStatus::Interrupted;
    }

    pub fn on_gate_opened(&mut self) {
        self.gate_closed = false;
        if self.status == PlaybackStatus::Interrupted {
            self.status = PlaybackStatus::Idle;
        }
    }

    pub fn on_explicit_playback_end(&mut self, response_id: Option<String>) {
        if let Some(id) = response_id {
            self.current_response_id = Some(id);
        }
        self.status = PlaybackStatus::Idle;
        self.provider_done = false;
        self.gate_closed = false;
    }

    /// Forces IDLE if no audio has been sent for longer than `idle_timeout_ms`.
    /// Returns `true` if this call performed the transition.
    pub fn maybe_timeout_idle(&mut self, now_ms: u64, idle_timeout_ms: u64) -> bool {
        if matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Draining)
            && self.last_audio_sent_ms != 0
            && now_ms.saturating_sub(self.last_audio_sent_ms) > idle_timeout_ms
        {
            self.status = PlaybackStatus::Idle;
            return true;
        }
        false
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Draining)
    }

    pub fn is_interrupting(&self) -> bool {
        self.status == PlaybackStatus::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_sent_after_provider_done_reopens_playing() {
        let mut s = PlaybackState::default();
        s.on_outbound_audio_sent(100, Some("r1".into()));
        s.on_provider_done(None);
        assert_eq!(s.status, PlaybackStatus::Draining);
        s.on_outbound_audio_sent(150, None);
        assert_eq!(s.status, PlaybackStatus::Playing);
    }

    #[test]
    fn gate_closed_then_opened_returns_to_idle_only_from_interrupted() {
        let mut s = PlaybackState::default();
        s.on_outbound_audio_sent(0, None);
        s.on_gate_closed();
        assert_eq!(s.status, PlaybackStatus::Interrupted);
        s.on_gate_opened();
        assert_eq!(s.status, PlaybackStatus::Idle);
    }

    #[test]
    fn idle_timeout_only_fires_while_active() {
        let mut s = PlaybackState::default();
        assert!(!s.maybe_timeout_idle(10_000, 500));
        s.on_outbound_audio_sent(0, None);
        assert!(s.maybe_timeout_idle(1_000, 500));
        assert_eq!(s.status, PlaybackStatus::Idle);
    }
}
