//! Bounded in-memory sink for tests and development.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{AppResult, Sink};

/// Keeps the most recent `max_records` records. Clones share storage, so a
/// clone handed to a batcher can be inspected through the original.
#[derive(Debug)]
pub struct InMemorySink<T> {
    records: Arc<Mutex<VecDeque<T>>>,
    max_records: usize,
}

impl<T> InMemorySink<T> {
    /// Create a sink holding at most `max_records` records.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(max_records.min(1024)))),
            max_records,
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl<T: Clone> InMemorySink<T> {
    /// Snapshot of stored records, oldest first.
    pub fn records(&self) -> Vec<T> {
        self.records.lock().iter().cloned().collect()
    }
}

impl<T> Clone for InMemorySink<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            max_records: self.max_records,
        }
    }
}

impl<T: Send> Sink<T> for InMemorySink<T> {
    fn add(&mut self, batch: Vec<T>) -> AppResult<()> {
        let mut records = self.records.lock();
        for record in batch {
            if records.len() >= self.max_records {
                records.pop_front();
            }
            records.push_back(record);
        }
        Ok(())
    }
}
