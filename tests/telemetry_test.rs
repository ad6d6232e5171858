//! Integration tests for log persistence through the global subscriber
//!
//! These tests validate:
//! - Installing the store layer as the global subscriber
//! - Structured events reaching the storage sink in batches

use batchwork::config::BatcherConfig;
use batchwork::infra::{InMemorySink, LogRecord, StoreLayer};
use batchwork::util::{init_tracing, init_tracing_with_store};
use std::time::{Duration, Instant};

#[test]
fn test_global_store_layer_persists_events() {
    let sink: InMemorySink<LogRecord> = InMemorySink::new(1_000);
    let layer = StoreLayer::new(
        BatcherConfig::new()
            .with_batch_size(10)
            .with_batch_wait(Duration::from_millis(20)),
        sink.clone(),
    )
    .unwrap();
    assert!(init_tracing_with_store(layer));
    // A second install is refused and the default helper becomes a no-op.
    init_tracing();

    tracing::info!(target: "ingest", batch = 7_u64, "Batch committed");

    let started = Instant::now();
    let found = loop {
        let hit = sink
            .records()
            .into_iter()
            .find(|record| record.target == "ingest");
        if hit.is_some() || started.elapsed() > Duration::from_secs(2) {
            break hit;
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let record = found.expect("event stored");
    assert_eq!(record.level, "INFO");
    assert_eq!(record.message.as_deref(), Some("Batch committed"));
    assert_eq!(record.fields["batch"], serde_json::Value::from(7_u64));
    assert!(record.timestamp_ms > 0);
}
