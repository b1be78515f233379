//! Dispatches normalized provider output events to the first handler that
//! claims them, in a fixed registration order.

use std::sync::Arc;

use log::info;

use super::ProviderOutputEvent;

/// A specialized handler for one provider output event kind.
#[async_trait::async_trait]
pub trait ProviderOutputHandler: Send + Sync {
    fn can_handle(&self, event: &ProviderOutputEvent) -> bool;
    async fn handle(&self, event: Arc<ProviderOutputEvent>);
}

/// Tries each registered handler in order and hands the event to the first
/// one that claims it; logs and drops events nothing claims.
pub struct ProviderOutputDispatcher {
    handlers: Vec<Arc<dyn ProviderOutputHandler>>,
}

impl ProviderOutputDispatcher {
    pub fn new(handlers: Vec<Arc<dyn ProviderOutputHandler>>) -> Self {
        Self { handlers }
    }

    pub async fn dispatch(&self, event: Arc<ProviderOutputEvent>) {
        info!(
            "provider output received type={} session={} participant={:?} commit={:?}",
            event.event_type, event.session_id, event.participant_id, event.commit_id
        );
        for handler in &self.handlers {
            if handler.can_handle(&event) {
                handler.handle(event).await;
                return;
            }
        }
        info!("ignoring unsupported provider output event: {}", event.event_type);
    }
}
