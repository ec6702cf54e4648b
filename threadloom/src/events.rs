//! Default event sink: forwards pool events to `tracing`.

use threadloom_api::{EventSink, PoolEvent};
use tracing::{debug, error, info, warn, Level};

pub use threadloom_api::events::{NoopSink, RetireReason};

/// Logs each [`PoolEvent`] at the level returned by [`PoolEvent::level`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &PoolEvent) {
        let level = event.level();
        if level == Level::ERROR {
            error!(target: "threadloom::events", "{}", event);
        } else if level == Level::WARN {
            warn!(target: "threadloom::events", "{}", event);
        } else if level == Level::INFO {
            info!(target: "threadloom::events", "{}", event);
        } else {
            debug!(target: "threadloom::events", "{}", event);
        }
    }
}
