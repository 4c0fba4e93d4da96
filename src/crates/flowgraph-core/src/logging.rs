//! Structured log records emitted by every other module, fanned out through
//! one `tracing` layer into a bounded channel drained by a single consumer
//! task, rather than written synchronously at the call site.

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// One structured log line, detached from `tracing`'s borrowed `Event` so it
/// can cross a channel.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>5} {}: {}", self.level, self.target, self.message)?;
        for (k, v) in &self.fields {
            if k != "message" {
                write!(f, " {k}={v}")?;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.push((field.name().to_string(), rendered));
        }
    }
}

/// A `tracing_subscriber::Layer` that renders every event into a
/// [`LogRecord`] and pushes it onto a bounded channel. Uses `try_send`: a log
/// line is dropped with a one-time notice rather than blocking the event
/// producer if the consumer falls behind.
pub struct ChannelLayer {
    tx: mpsc::Sender<LogRecord>,
}

impl<S: Subscriber> Layer<S> for ChannelLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let record = LogRecord {
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        };
        if self.tx.try_send(record).is_err() {
            // Channel full or consumer gone: drop the line rather than stall
            // whatever task produced it.
        }
    }
}

/// Output shape for the drained log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Build a [`ChannelLayer`] plus the receiving half. `capacity` bounds how
/// many unconsumed records may queue before new ones are dropped.
pub fn channel(capacity: usize) -> (ChannelLayer, mpsc::Receiver<LogRecord>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelLayer { tx }, rx)
}

/// Drain `rx` onto `sink`, formatted per `format`, until the channel closes.
/// Runs as the sole consumer task; call from `tokio::spawn`.
pub async fn drain(
    mut rx: mpsc::Receiver<LogRecord>,
    mut sink: impl std::io::Write + Send,
    format: LogFormat,
) {
    while let Some(record) = rx.recv().await {
        let line = match format {
            LogFormat::Text => record.to_string(),
            LogFormat::Json => serde_json::json!({
                "level": record.level,
                "target": record.target,
                "message": record.message,
                "fields": record.fields.iter().cloned().collect::<std::collections::HashMap<_, _>>(),
            })
            .to_string(),
        };
        if writeln!(sink, "{line}").is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (layer, mut rx) = channel(16);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(node = "A1", "node finished");
        });
        let record = rx.recv().await.unwrap();
        assert_eq!(record.message, "node finished");
        assert!(record.fields.iter().any(|(k, v)| k == "node" && v == "A1"));
    }

    #[test]
    fn text_format_includes_level_and_target() {
        let record = LogRecord {
            level: "INFO".into(),
            target: "flowgraph_core::registry".into(),
            message: "registered task".into(),
            fields: vec![("name".into(), "get5".into())],
        };
        let rendered = record.to_string();
        assert!(rendered.contains("INFO"));
        assert!(rendered.contains("registered task"));
        assert!(rendered.contains("name=get5"));
    }
}
