//! Tracing layer that forwards log events to a channel.
//!
//! The CLI uses it to mirror raw console output (target `depotctl::console`)
//! to the terminal while the same events also go to the log file.

use crate::buffer::CONSOLE_TARGET;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// A log event as forwarded to the channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsoleLogEvent {
    /// Event target (e.g., "depotctl::console")
    pub target: String,
    /// Log level (INFO, DEBUG, WARN, ERROR)
    pub level: String,
    pub message: String,
    /// Structured fields such as `session_id` or `operation_id`
    pub fields: HashMap<String, Value>,
    pub timestamp: String,
}

impl ConsoleLogEvent {
    /// True for lines printed by the external tool itself.
    pub fn is_console(&self) -> bool {
        self.target == CONSOLE_TARGET
    }
}

/// Sends every event it sees to an unbounded channel.
pub struct ConsoleEventLayer {
    sender: mpsc::UnboundedSender<ConsoleLogEvent>,
}

impl ConsoleEventLayer {
    pub fn new(sender: mpsc::UnboundedSender<ConsoleLogEvent>) -> Self {
        Self { sender }
    }
}

impl<S> Layer<S> for ConsoleEventLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        let message = fields
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        // Receiver gone means nobody is watching; drop the event
        let _ = self.sender.send(ConsoleLogEvent {
            target: event.metadata().target().to_string(),
            level: event.metadata().level().to_string(),
            message,
            fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(
            field.name().to_string(),
            serde_json::json!(format!("{:?}", value)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OutputBuffer;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_console_lines_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = tracing_subscriber::registry().with(ConsoleEventLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            let buffer = OutputBuffer::new();
            buffer.append("Loading Steam API...OK\nSteam>");
            tracing::info!(operation_id = "abc", "[OperationTracker] started");
        });

        let first = rx.try_recv().unwrap();
        assert!(first.is_console());
        assert_eq!(first.message, "Loading Steam API...OK");

        let second = rx.try_recv().unwrap();
        assert!(!second.is_console());
        assert_eq!(second.fields.get("operation_id"), Some(&serde_json::json!("abc")));
        assert_eq!(second.level, "INFO");

        // The partial "Steam>" line is not logged until it is terminated
        assert!(rx.try_recv().is_err());
    }
}
