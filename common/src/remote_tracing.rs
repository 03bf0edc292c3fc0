use serde::{Deserialize, Serialize};

/// One tracing event captured inside a worker, shipped to the client verbatim.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TracingMessage {
    pub timestamp: std::time::SystemTime,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Layer that turns every event into a [`TracingMessage`] on an unbounded channel.
#[derive(Debug)]
pub struct RemoteTracingLayer {
    sender: tokio::sync::mpsc::UnboundedSender<TracingMessage>,
}

impl RemoteTracingLayer {
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<TracingMessage>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl FieldVisitor {
    fn record(&mut self, field: &tracing::field::Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }

    fn into_message(self) -> String {
        let fields = self
            .fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        match (self.message, fields.is_empty()) {
            (Some(message), true) => message,
            (Some(message), false) => format!("{message} {fields}"),
            (None, _) => fields,
        }
    }
}

impl tracing_subscriber::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record(field, value.to_string());
    }
}

impl<S> tracing_subscriber::Layer<S> for RemoteTracingLayer
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let message = TracingMessage {
            timestamp: std::time::SystemTime::now(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.into_message(),
        };
        // receiver gone means the worker is shutting down
        let _ = self.sender.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn events_are_captured_with_fields() {
        let (layer, mut receiver) = RemoteTracingLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "rbakd", code = 24, "partial transfer");
            tracing::info!("plain");
        });
        let first = receiver.try_recv().unwrap();
        assert_eq!(first.level, "WARN");
        assert_eq!(first.target, "rbakd");
        assert_eq!(first.message, "partial transfer code=24");
        let second = receiver.try_recv().unwrap();
        assert_eq!(second.level, "INFO");
        assert_eq!(second.message, "plain");
        assert!(receiver.try_recv().is_err());
    }
}
