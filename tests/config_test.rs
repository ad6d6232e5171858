//! Integration tests for configuration loading
//!
//! These tests validate:
//! - JSON documents with defaults for omitted fields
//! - Validation errors naming the offending component
//! - Environment-driven loading, inline or from a file

use batchwork::config::{BackpressureConfig, SubstrateConfig};
use batchwork::core::PutMode;
use std::time::Duration;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const FULL_CONFIG: &str = r#"{
    "batchers": {
        "events": {
            "batch_size": 250,
            "batch_wait_ms": 500,
            "queue_capacity": 5000,
            "backpressure": { "timeout": { "timeout_ms": 40 } }
        }
    },
    "streamers": {
        "rows": { "batch_size": 1000 }
    },
    "caches": {
        "users": { "time_to_serve_ms": 10000, "time_to_live_ms": 60000 }
    },
    "reorderers": {
        "feed": { "max_ooo": 64, "loss_log_period_ms": 60000 }
    }
}"#;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("batchwork-{}-{name}", std::process::id()))
}

// ============================================================================
// PARSING TESTS
// ============================================================================

#[test]
fn test_full_document_parses() {
    let config = SubstrateConfig::from_json_str(FULL_CONFIG).unwrap();

    let events = &config.batchers["events"];
    assert_eq!(events.batch_size, 250);
    assert_eq!(events.batch_wait(), Duration::from_millis(500));
    assert_eq!(
        events.backpressure.put_mode(),
        PutMode::Timeout(Duration::from_millis(40))
    );

    let rows = &config.streamers["rows"];
    assert_eq!(rows.batch_size, 1000);
    assert_eq!(rows.batch_wait_ms, 1000, "omitted fields take defaults");

    let users = &config.caches["users"];
    assert_eq!(users.time_to_serve(), Some(Duration::from_secs(10)));
    assert_eq!(users.time_to_live(), Some(Duration::from_secs(60)));

    let feed = &config.reorderers["feed"];
    assert_eq!(feed.max_ooo, Some(64));
    assert_eq!(feed.loss_log_period(), Some(Duration::from_secs(60)));
}

#[test]
fn test_default_backpressure_blocks() {
    let config =
        SubstrateConfig::from_json_str(r#"{ "batchers": { "b": { "batch_size": 3 } } }"#).unwrap();
    assert_eq!(config.batchers["b"].backpressure, BackpressureConfig::Block);
}

#[test]
fn test_invalid_component_named() {
    let err = SubstrateConfig::from_json_str(r#"{ "caches": { "users": { "time_to_live_ms": 0 } } }"#)
        .unwrap_err();
    assert!(err.contains("cache `users` invalid"), "{err}");
}

#[test]
fn test_empty_document_rejected() {
    let err = SubstrateConfig::from_json_str("{}").unwrap_err();
    assert!(err.contains("at least one component"), "{err}");
}

#[test]
fn test_malformed_json_reported() {
    let err = SubstrateConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}

// ============================================================================
// ENVIRONMENT TESTS
// ============================================================================

#[test]
fn test_from_env_inline_json() {
    let var = "BATCHWORK_TEST_INLINE_CONFIG";
    std::env::set_var(var, FULL_CONFIG);
    let config = SubstrateConfig::from_env(var).unwrap();
    assert_eq!(config.batchers.len(), 1);
    std::env::remove_var(var);
}

#[test]
fn test_from_env_file_path() {
    let var = "BATCHWORK_TEST_FILE_CONFIG";
    let path = temp_path("config.json");
    std::fs::write(&path, FULL_CONFIG).unwrap();
    std::env::set_var(var, &path);

    let config = SubstrateConfig::from_env(var).unwrap();
    assert_eq!(config.caches.len(), 1);

    std::env::remove_var(var);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_from_env_missing_variable() {
    let err = SubstrateConfig::from_env("BATCHWORK_TEST_UNSET_CONFIG").unwrap_err();
    assert!(err.starts_with("BATCHWORK_TEST_UNSET_CONFIG"), "{err}");
}

#[test]
fn test_round_trip_through_serde() {
    let config = SubstrateConfig::from_json_str(FULL_CONFIG).unwrap();
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(SubstrateConfig::from_json_str(&json).unwrap(), config);
}
