//! Tracing layer that persists log events in batches.
//!
//! Every event becomes a [`LogRecord`] put on a [`Batcher`] whose handler
//! writes batches to a storage [`Sink`]. Puts never block the logging thread:
//! a full queue drops the record. Failures are reported on stderr and never
//! reach the caller. Events raised while storing, on the batcher's worker
//! thread or from the batcher module, are not stored.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::BatcherConfig;
use crate::core::{Batcher, PutMode, Sink, SinkHandler, WorkError};
use crate::util::clock::now_ms;

const BATCHER_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::core::batcher");

/// One stored log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Level name, e.g. `INFO`.
    pub level: String,
    /// Event target, usually the module path.
    pub target: String,
    /// The formatted message, if any.
    pub message: Option<String>,
    /// Remaining structured fields.
    pub fields: Map<String, Value>,
}

impl LogRecord {
    fn from_event(event: &Event<'_>) -> Self {
        let meta = event.metadata();
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        Self {
            timestamp_ms: u64::try_from(now_ms()).unwrap_or(u64::MAX),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        }
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }
}

/// Layer batching log records into a storage sink.
#[derive(Debug)]
pub struct StoreLayer {
    batcher: Batcher<LogRecord>,
    worker_thread: String,
}

impl StoreLayer {
    /// Start the batcher feeding `sink`.
    ///
    /// # Errors
    ///
    /// Same as [`Batcher::new`].
    pub fn new<S>(config: BatcherConfig, sink: S) -> Result<Self, WorkError>
    where
        S: Sink<LogRecord> + 'static,
    {
        let batcher = Batcher::new("log-store", config, SinkHandler(sink))?;
        let worker_thread = batcher.worker_thread();
        Ok(Self {
            batcher,
            worker_thread,
        })
    }

    /// The underlying batcher, e.g. for stats or an explicit shutdown.
    pub const fn batcher(&self) -> &Batcher<LogRecord> {
        &self.batcher
    }

    fn is_own(&self, event: &Event<'_>) -> bool {
        event.metadata().target() == BATCHER_TARGET
            || std::thread::current().name() == Some(self.worker_thread.as_str())
    }

    fn store(&self, record: LogRecord) {
        if let Err(e) = self.batcher.put_with(record, PutMode::Reject) {
            eprintln!("log store: dropping record: {e}");
        }
    }
}

impl<S: Subscriber> Layer<S> for StoreLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if self.is_own(event) {
            return;
        }
        self.store(LogRecord::from_event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::sink::InMemorySink;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_events_reach_sink_as_records() {
        let sink = InMemorySink::new(16);
        let layer = StoreLayer::new(
            BatcherConfig::new()
                .with_batch_size(2)
                .with_batch_wait(Duration::from_millis(20)),
            sink.clone(),
        )
        .unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(job = "nightly", rows = 42_u64, "Import finished");
            tracing::warn!(ok = false, "Retrying");
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sink.len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, "INFO");
        assert_eq!(records[0].message.as_deref(), Some("Import finished"));
        assert_eq!(records[0].fields["job"], Value::from("nightly"));
        assert_eq!(records[0].fields["rows"], Value::from(42_u64));
        assert_eq!(records[1].fields["ok"], Value::from(false));
    }
}
