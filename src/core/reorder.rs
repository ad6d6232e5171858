//! Sequence reordering with a bounded out-of-order window.
//!
//! [`Reorderer`] buffers sequence-numbered items in a min-heap and releases
//! them in strictly increasing order. The smallest buffered item is released
//! when it is the next expected number, or when the highest number seen is at
//! least `max_ooo` ahead of it; the numbers skipped then are counted as lost.
//! Anything below the release watermark is discarded as late.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::config::ReorderConfig;
use crate::core::task::{Flow, Task, TaskResult};
use crate::core::WorkError;

/// A payload tagged with its sequence number. Ordered by `seq` only.
#[derive(Debug, Clone)]
pub struct Sequenced<T> {
    /// Sequence number.
    pub seq: u64,
    /// Carried item.
    pub payload: T,
}

impl<T> PartialEq for Sequenced<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Sequenced<T> {}

impl<T> PartialOrd for Sequenced<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Sequenced<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.seq.cmp(&other.seq)
    }
}

/// Snapshot of reorder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LossStats {
    /// Items pushed since the last reset.
    pub seen: u64,
    /// Sequence numbers skipped since the last reset.
    pub lost: u64,
    /// Items discarded as duplicate or too late (never reset).
    pub late: u64,
}

#[derive(Debug, Default)]
struct LossCounters {
    seen: AtomicU64,
    lost: AtomicU64,
    late: AtomicU64,
}

impl LossCounters {
    fn snapshot(&self) -> LossStats {
        LossStats {
            seen: self.seen.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
        }
    }

    /// Log and reset `seen`/`lost` if anything was lost.
    fn report(&self) {
        if self.lost.load(Ordering::Relaxed) == 0 {
            return;
        }
        let lost = self.lost.swap(0, Ordering::Relaxed);
        let seen = self.seen.swap(0, Ordering::Relaxed);
        info!(seen, lost, "Sequence loss");
    }
}

/// In-order release of out-of-order sequence numbers.
pub struct Reorderer<T> {
    max_ooo: Option<u64>,
    heap: BinaryHeap<Reverse<Sequenced<T>>>,
    next_seq: u64,
    max_seq: u64,
    counters: Arc<LossCounters>,
    _loss_log: Option<Task>,
}

impl<T> Reorderer<T> {
    /// Reorderer expecting sequence 0 first. `None` never gives up on a gap.
    pub fn new(max_ooo: Option<u64>) -> Self {
        Self {
            max_ooo,
            heap: BinaryHeap::new(),
            next_seq: 0,
            max_seq: 0,
            counters: Arc::new(LossCounters::default()),
            _loss_log: None,
        }
    }

    /// Reorderer from config. With a window and a loss log period, a task
    /// logs `seen`/`lost` every period in which something was lost, then
    /// resets them; it stops once the reorderer is dropped.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` for an invalid config, `WorkError::Worker`
    /// if the loss log task cannot be started.
    pub fn from_config(config: &ReorderConfig) -> Result<Self, WorkError> {
        config.validate().map_err(WorkError::InvalidConfig)?;
        let mut reorderer = Self::new(config.max_ooo);
        if let (Some(_), Some(period)) = (config.max_ooo, config.loss_log_period()) {
            let counters: Weak<LossCounters> = Arc::downgrade(&reorderer.counters);
            let task = Task::every("reorder-loss-log", period, move || -> TaskResult {
                let Some(counters) = counters.upgrade() else {
                    return Ok(Flow::Stop);
                };
                counters.report();
                Ok(Flow::Continue)
            })?;
            reorderer._loss_log = Some(task);
        }
        Ok(reorderer)
    }

    /// Start expecting `seq` instead of 0.
    #[must_use]
    pub const fn starting_at(mut self, seq: u64) -> Self {
        self.next_seq = seq;
        self.max_seq = seq;
        self
    }

    /// Buffer one item. Items below the release watermark are discarded.
    pub fn push(&mut self, seq: u64, payload: T) {
        self.counters.seen.fetch_add(1, Ordering::Relaxed);
        if seq < self.next_seq {
            self.counters.late.fetch_add(1, Ordering::Relaxed);
            debug!(seq, next = self.next_seq, "Discarding late item");
            return;
        }
        self.max_seq = self.max_seq.max(seq);
        self.heap.push(Reverse(Sequenced { seq, payload }));
    }

    /// Release the next item if the ordering rules allow it.
    pub fn pop(&mut self) -> Option<Sequenced<T>> {
        loop {
            let head = self.heap.peek()?.0.seq;
            if head < self.next_seq {
                // Duplicate of something already released.
                self.heap.pop();
                self.counters.late.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let window_closed = self
                .max_ooo
                .is_some_and(|max_ooo| self.max_seq - head >= max_ooo);
            if head != self.next_seq && !window_closed {
                return None;
            }
            return self.release();
        }
    }

    /// Release everything still buffered, in order, counting gaps as lost.
    /// Used at end of input.
    pub fn flush(&mut self) -> Option<Sequenced<T>> {
        loop {
            let head = self.heap.peek()?.0.seq;
            if head < self.next_seq {
                self.heap.pop();
                self.counters.late.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            return self.release();
        }
    }

    fn release(&mut self) -> Option<Sequenced<T>> {
        let Reverse(item) = self.heap.pop()?;
        let skipped = item.seq - self.next_seq;
        if skipped > 0 {
            self.counters.lost.fetch_add(skipped, Ordering::Relaxed);
            debug!(from = self.next_seq, to = item.seq, "Gap closed by window");
        }
        self.next_seq = item.seq + 1;
        Some(item)
    }

    /// Next sequence number expected.
    pub const fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Items buffered awaiting release.
    pub fn buffered(&self) -> usize {
        self.heap.len()
    }

    /// Current counters.
    pub fn stats(&self) -> LossStats {
        self.counters.snapshot()
    }
}

impl<T> std::fmt::Debug for Reorderer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reorderer")
            .field("max_ooo", &self.max_ooo)
            .field("next_seq", &self.next_seq)
            .field("max_seq", &self.max_seq)
            .field("buffered", &self.heap.len())
            .finish_non_exhaustive()
    }
}

/// Lazy in-order view of a `(seq, payload)` iterator.
///
/// Pulls from the source only as far as needed to release the next item;
/// when the source ends, whatever is still buffered is released in order.
pub struct Reordered<I, T> {
    source: I,
    reorderer: Reorderer<T>,
    exhausted: bool,
}

impl<I, T> Reordered<I, T>
where
    I: Iterator<Item = (u64, T)>,
{
    /// Wrap `source` with the given reorderer.
    pub const fn new(source: I, reorderer: Reorderer<T>) -> Self {
        Self {
            source,
            reorderer,
            exhausted: false,
        }
    }

    /// The underlying reorderer.
    pub const fn reorderer(&self) -> &Reorderer<T> {
        &self.reorderer
    }
}

impl<I, T> Iterator for Reordered<I, T>
where
    I: Iterator<Item = (u64, T)>,
{
    type Item = (u64, T);

    fn next(&mut self) -> Option<(u64, T)> {
        loop {
            if self.exhausted {
                return self.reorderer.flush().map(|item| (item.seq, item.payload));
            }
            if let Some(item) = self.reorderer.pop() {
                return Some((item.seq, item.payload));
            }
            match self.source.next() {
                Some((seq, payload)) => self.reorderer.push(seq, payload),
                None => self.exhausted = true,
            }
        }
    }
}

/// Reorder `source` with window `max_ooo`.
pub fn reordered<I, T>(source: I, max_ooo: Option<u64>) -> Reordered<I::IntoIter, T>
where
    I: IntoIterator<Item = (u64, T)>,
{
    Reordered::new(source.into_iter(), Reorderer::new(max_ooo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_drops_late_item() {
        let input = vec![(2, 'c'), (0, 'a'), (1, 'b'), (6, 'g'), (4, 'e'), (3, 'd'), (5, 'f')];
        let mut stream = reordered(input, Some(2));
        let out: Vec<char> = stream.by_ref().map(|(_, c)| c).collect();
        assert_eq!(out, vec!['a', 'b', 'c', 'e', 'f', 'g']);
        let stats = stream.reorderer().stats();
        assert_eq!(stats.seen, 7);
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.late, 1);
    }

    #[test]
    fn test_unbounded_window_waits_for_gaps() {
        let mut r = Reorderer::new(None);
        r.push(1, "b");
        r.push(5, "f");
        assert!(r.pop().is_none());
        r.push(0, "a");
        assert_eq!(r.pop().map(|i| i.payload), Some("a"));
        assert_eq!(r.pop().map(|i| i.payload), Some("b"));
        assert!(r.pop().is_none());
        assert_eq!(r.buffered(), 1);
        assert_eq!(r.flush().map(|i| i.seq), Some(5));
        assert_eq!(r.stats().lost, 3);
    }

    #[test]
    fn test_duplicates_emitted_once() {
        let input = vec![(0, 1), (1, 2), (1, 2), (0, 1), (2, 3)];
        let out: Vec<u64> = reordered(input, Some(3)).map(|(seq, _)| seq).collect();
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_inside_heap_discarded_on_pop() {
        let mut r = Reorderer::new(Some(10));
        r.push(2, 'x');
        r.push(2, 'y');
        r.push(1, 'b');
        r.push(0, 'a');
        let seqs: Vec<u64> = std::iter::from_fn(|| r.pop()).map(|i| i.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(r.stats().late, 1);
    }

    #[test]
    fn test_starting_at_offset() {
        let out: Vec<u64> = Reordered::new(
            vec![(101, ()), (100, ())].into_iter(),
            Reorderer::new(Some(1)).starting_at(100),
        )
        .map(|(seq, ())| seq)
        .collect();
        assert_eq!(out, vec![100, 101]);
    }

    #[test]
    fn test_loss_report_resets_counters() {
        let mut r = Reorderer::new(Some(0));
        r.push(3, ());
        assert!(r.pop().is_some());
        r.counters.report();
        let stats = r.stats();
        assert_eq!((stats.seen, stats.lost), (0, 0));
    }
}
