//! In-memory capture of `tracing` events for assertions.
//!
//! [`LogCapture`] is a `tracing_subscriber` layer that records every event it
//! sees. Install it for the current thread with [`LogCapture::install`]; on a
//! `#[tokio::test]` runtime that also covers tasks spawned by the code under
//! test.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// A single captured event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    /// Remaining fields rendered as `name=value`, space separated.
    pub fields: String,
}

#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route this thread's events to the capture until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        tracing_subscriber::registry()
            .with(self.clone())
            .set_default()
    }

    /// Snapshot of everything captured so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Whether an event at `level` has a message containing `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    /// Events at `level` whose message contains `needle`.
    pub fn matching(&self, level: Level, needle: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level && e.message.contains(needle))
            .collect()
    }

    /// Poll until [`contains`](Self::contains) holds or `timeout` passes.
    pub async fn wait_for(&self, level: Level, needle: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.contains(level, needle) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        if let Ok(mut events) = self.events.lock() {
            events.push(CapturedEvent {
                level: *metadata.level(),
                target: metadata.target().to_string(),
                message: visitor.message,
                fields: visitor.fields.trim_end().to_string(),
            });
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: String,
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, "{}={value:?} ", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, "{}={value} ", field.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_message_and_fields() {
        let capture = LogCapture::new();
        let _guard = capture.install();

        tracing::error!(message_id = 7, path = "/tmp/x.sock", "Shutdown failed");
        tracing::info!("Connection handled");

        let events = capture.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, Level::ERROR);
        assert_eq!(events[0].message, "Shutdown failed");
        assert!(events[0].fields.contains("message_id=7"));
        assert!(events[0].fields.contains("path=/tmp/x.sock"));
        assert!(capture.contains(Level::INFO, "handled"));
        assert!(!capture.contains(Level::ERROR, "handled"));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let capture = LogCapture::new();
        let _guard = capture.install();
        assert!(
            !capture
                .wait_for(Level::WARN, "never", Duration::from_millis(30))
                .await
        );
    }
}
