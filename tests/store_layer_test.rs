//! Integration tests for a failing log store
//!
//! These tests validate:
//! - Events raised while storing are not fed back into the store
//! - A panicking sink costs one failed batch, not a loop of them

use batchwork::config::BatcherConfig;
use batchwork::core::{AppResult, Sink};
use batchwork::infra::{LogRecord, StoreLayer};
use batchwork::util::init_tracing_with_store;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Sink that logs a warning of its own and then panics on every batch.
struct BrokenSink {
    calls: Arc<AtomicUsize>,
    records: Arc<AtomicUsize>,
}

impl Sink<LogRecord> for BrokenSink {
    fn add(&mut self, batch: Vec<LogRecord>) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records.fetch_add(batch.len(), Ordering::SeqCst);
        tracing::warn!(target: "storage", rows = batch.len(), "Insert is slow");
        panic!("connection reset");
    }
}

// ============================================================================
// FEEDBACK TESTS
// ============================================================================

#[test]
fn test_failing_sink_does_not_store_its_own_reports() {
    let calls = Arc::new(AtomicUsize::new(0));
    let records = Arc::new(AtomicUsize::new(0));
    let layer = StoreLayer::new(
        BatcherConfig::new()
            .with_batch_size(10)
            .with_batch_wait(Duration::from_millis(20)),
        BrokenSink {
            calls: Arc::clone(&calls),
            records: Arc::clone(&records),
        },
    )
    .unwrap();
    assert!(init_tracing_with_store(layer));

    tracing::info!(target: "ingest", "Nightly import started");

    // Ten batch waits: a feedback loop would call the sink again each time.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(records.load(Ordering::SeqCst), 1);
}
