//! Bounded queue abstraction and the two-phase batch drain.
//!
//! Backends live in [`crate::infra::queue`]: an in-process channel and a
//! cross-process pipe channel. Both are FIFO and capacity-bounded; a put on a
//! full queue blocks, waits up to a timeout, or is rejected, depending on the
//! [`PutMode`] the caller picks. That choice is the backpressure policy.

use std::time::{Duration, Instant};

use crate::core::WorkError;

/// What a put does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Block until space frees up.
    #[default]
    Block,
    /// Block for at most this long, then fail with `WorkError::Timeout`.
    Timeout(Duration),
    /// Fail immediately with `WorkError::QueueFull`.
    Reject,
}

/// Capacity-bounded FIFO shared between producers and consumers.
pub trait BoundedQueue<T>: Send + Sync {
    /// Enqueue `item`, applying `mode` if the queue is full.
    ///
    /// # Errors
    ///
    /// `QueueFull` or `Timeout` depending on `mode`, `Disconnected` if the
    /// queue can no longer deliver items.
    fn put(&self, item: T, mode: PutMode) -> Result<(), WorkError>;

    /// Dequeue the oldest item, blocking up to `timeout` (forever if `None`).
    ///
    /// # Errors
    ///
    /// `Timeout` if nothing arrived in time, `Disconnected` if nothing ever will.
    fn get(&self, timeout: Option<Duration>) -> Result<T, WorkError>;

    /// Dequeue the oldest item if one is ready.
    fn try_get(&self) -> Option<T>;

    /// Items currently queued.
    fn len(&self) -> usize;

    /// High-water mark.
    fn capacity(&self) -> usize;

    /// Whether nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain a batch from `queue`.
///
/// Phase one blocks until `min_count` items have been taken or `max_wait`
/// elapses (`None` waits indefinitely). Phase two then takes whatever is
/// already queued without blocking, up to `max_count` items in total.
/// `min_count == 0` never blocks. A disconnected queue ends phase one early.
pub fn dequeue<T, Q>(
    queue: &Q,
    min_count: usize,
    max_wait: Option<Duration>,
    max_count: Option<usize>,
) -> Vec<T>
where
    Q: BoundedQueue<T> + ?Sized,
{
    let limit = max_count.unwrap_or(usize::MAX);
    let min_count = min_count.min(limit);
    let deadline = max_wait.map(|wait| Instant::now() + wait);
    let mut batch =
        Vec::with_capacity(min_count.min(queue.capacity()).max(queue.len().min(limit)));

    while batch.len() < min_count {
        let timeout = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                Some(left)
            }
            None => None,
        };
        match queue.get(timeout) {
            Ok(item) => batch.push(item),
            Err(_) => break,
        }
    }

    while batch.len() < limit {
        match queue.try_get() {
            Some(item) => batch.push(item),
            None => break,
        }
    }
    batch
}

/// Blocking iterator over a queue; ends when the queue disconnects.
pub struct QueueIter<'a, T, Q: ?Sized> {
    queue: &'a Q,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<'a, T, Q> QueueIter<'a, T, Q>
where
    Q: BoundedQueue<T> + ?Sized,
{
    /// Iterate over `queue`.
    pub const fn new(queue: &'a Q) -> Self {
        Self {
            queue,
            _item: std::marker::PhantomData,
        }
    }
}

impl<T, Q> Iterator for QueueIter<'_, T, Q>
where
    Q: BoundedQueue<T> + ?Sized,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.get(None).ok()
    }
}
