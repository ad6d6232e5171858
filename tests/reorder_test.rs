//! Integration tests for sequence reordering
//!
//! These tests validate:
//! - Strictly increasing output for arbitrary permutations
//! - Window-driven loss accounting
//! - Late and duplicate arrivals are discarded

use batchwork::config::ReorderConfig;
use batchwork::core::{reordered, LossStats, Reordered, Reorderer};
use rand::seq::SliceRandom;
use std::time::Duration;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn permutation(n: u64) -> Vec<(u64, u64)> {
    let mut seqs: Vec<u64> = (0..n).collect();
    seqs.shuffle(&mut rand::rng());
    seqs.into_iter().map(|seq| (seq, seq * 10)).collect()
}

fn assert_strictly_increasing(out: &[(u64, u64)]) {
    for pair in out.windows(2) {
        assert!(pair[0].0 < pair[1].0, "{} then {}", pair[0].0, pair[1].0);
    }
    for (seq, payload) in out {
        assert_eq!(*payload, seq * 10, "payload travels with its sequence number");
    }
}

// ============================================================================
// ORDERING TESTS
// ============================================================================

#[test]
fn test_documented_example() {
    let input = vec![
        (2, 'c'),
        (0, 'a'),
        (1, 'b'),
        (6, 'g'),
        (4, 'e'),
        (3, 'd'),
        (5, 'f'),
    ];
    let mut stream = reordered(input, Some(2));
    let out: String = stream.by_ref().map(|(_, c)| c).collect();
    assert_eq!(out, "abcefg");

    let stats = stream.reorderer().stats();
    assert_eq!((stats.seen, stats.lost, stats.late), (7, 1, 1));
}

#[test]
fn test_random_permutations_stay_ordered() {
    for window in [0, 1, 2, 5, 50, 1_000] {
        let out: Vec<(u64, u64)> = reordered(permutation(500), Some(window)).collect();
        assert_strictly_increasing(&out);
        assert_eq!(out.last().map(|(seq, _)| *seq), Some(499));
    }
}

#[test]
fn test_unbounded_window_loses_nothing() {
    let out: Vec<(u64, u64)> = reordered(permutation(1_000), None).collect();
    assert_eq!(out.len(), 1_000);
    assert_strictly_increasing(&out);
}

#[test]
fn test_window_wider_than_input_loses_nothing() {
    let mut stream = reordered(permutation(200), Some(200));
    let out: Vec<(u64, u64)> = stream.by_ref().collect();
    assert_eq!(out.len(), 200);
    assert_eq!(stream.reorderer().stats().lost, 0);
}

#[test]
fn test_emitted_plus_lost_plus_late_accounts_for_input() {
    let mut stream = reordered(permutation(300), Some(3));
    let emitted = stream.by_ref().count() as u64;
    let stats = stream.reorderer().stats();
    assert_eq!(stats.seen, 300);
    assert_eq!(emitted + stats.late, 300);
    assert_eq!(emitted + stats.lost, 300);
}

// ============================================================================
// INCREMENTAL API TESTS
// ============================================================================

#[test]
fn test_push_pop_releases_as_gaps_close() {
    let mut r = Reorderer::new(Some(3));
    r.push(1, "b");
    r.push(2, "c");
    assert!(r.pop().is_none(), "waiting for 0");
    r.push(0, "a");
    let released: Vec<&str> = std::iter::from_fn(|| r.pop()).map(|i| i.payload).collect();
    assert_eq!(released, vec!["a", "b", "c"]);
    assert_eq!(r.next_seq(), 3);

    r.push(0, "late");
    assert_eq!(r.stats().late, 1);
    assert_eq!(r.buffered(), 0);
}

#[test]
fn test_reordered_new_with_offset() {
    let source = vec![(12_u64, 'c'), (10, 'a'), (11, 'b')].into_iter();
    let out: String = Reordered::new(source, Reorderer::new(Some(5)).starting_at(10))
        .map(|(_, c)| c)
        .collect();
    assert_eq!(out, "abc");
}

#[test]
fn test_from_config_with_loss_log() {
    let config = ReorderConfig::with_window(1).with_loss_log_period(Duration::from_millis(10));
    let mut r = Reorderer::from_config(&config).unwrap();
    r.push(0, ());
    r.push(2, ());
    r.push(3, ());
    let released: Vec<u64> = std::iter::from_fn(|| r.pop()).map(|i| i.seq).collect();
    assert_eq!(released, vec![0, 2, 3]);

    // The loss log resets seen/lost once it has reported.
    let started = std::time::Instant::now();
    while r.stats() != LossStats::default() && started.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(r.stats().lost, 0);
    assert_eq!(r.stats().seen, 0);
}

#[test]
fn test_from_config_rejects_zero_log_period() {
    let config = ReorderConfig {
        max_ooo: Some(4),
        loss_log_period_ms: Some(0),
    };
    assert!(Reorderer::<()>::from_config(&config).is_err());
}
