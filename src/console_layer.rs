//! `tracing` layer that mirrors host log events into `console.ansi`

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use chrono::Local;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::console::{FileAppender, LogLine, Severity};

/// Late-bound destination for console lines.
///
/// Logging is initialized before the console helper exists; events are
/// dropped until [`ConsoleSink::attach`] is called.
#[derive(Clone, Default)]
pub struct ConsoleSink {
    appender: Arc<OnceLock<Arc<FileAppender>>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a console was already attached
    pub fn attach(&self, appender: Arc<FileAppender>) -> bool {
        self.appender.set(appender).is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.appender.get().is_some()
    }
}

pub struct ConsoleLayer {
    sink: ConsoleSink,
    min_severity: Severity,
    with_millis: bool,
}

impl ConsoleLayer {
    pub fn new(sink: ConsoleSink, min_severity: Severity, with_millis: bool) -> Self {
        Self { sink, min_severity, with_millis }
    }
}

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(appender) = self.sink.appender.get() else {
            return;
        };

        let metadata = event.metadata();
        let severity = Severity::from(metadata.level());
        if severity < self.min_severity {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = LogLine {
            severity,
            component: metadata.target().to_string(),
            thread: std::thread::current().name().map(str::to_string),
            timestamp: Local::now(),
            message: visitor.finish(),
        };

        // Nowhere to report a failure to the console itself
        let _ = appender.append(&line.format(self.with_millis));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;

    fn run_with_layer(layer: ConsoleLayer, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_events_before_attach_are_dropped() {
        let dir = TempDir::new().unwrap();
        let appender = Arc::new(FileAppender::open(dir.path().join("console.ansi")).unwrap());
        let sink = ConsoleSink::new();

        run_with_layer(ConsoleLayer::new(sink.clone(), Severity::Debug, false), || {
            tracing::info!("console not yet attached");
            assert!(sink.attach(Arc::clone(&appender)));
            tracing::info!("console attached");
        });

        let contents = std::fs::read_to_string(appender.path()).unwrap();
        // The thread segment carries the test's own name, so match on messages
        let messages: Vec<&str> = contents
            .lines()
            .filter_map(|line| line.rsplit_once("]: ").map(|(_, message)| message))
            .collect();
        assert_eq!(messages, vec!["console attached"]);
        assert!(!sink.attach(appender));
    }

    #[test]
    fn test_severity_filter_and_fields() {
        let dir = TempDir::new().unwrap();
        let appender = Arc::new(FileAppender::open(dir.path().join("console.ansi")).unwrap());
        let sink = ConsoleSink::new();
        sink.attach(Arc::clone(&appender));

        run_with_layer(ConsoleLayer::new(sink, Severity::Info, false), || {
            tracing::debug!("hidden");
            tracing::warn!(path = "a/b.txt", count = 2, "Resolved pick");
        });

        let contents = std::fs::read_to_string(appender.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("\x1b[38;5;229m"));
        assert!(lines[0].contains("WARN "));
        assert!(lines[0].ends_with("Resolved pick path=a/b.txt count=2"));
    }
}
