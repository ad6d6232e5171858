//! Push-direction producer decoupling.
//!
//! Producers `put` items on a bounded queue; a continuous [`Task`] drains it
//! with [`dequeue`] (at least `batch_size` items or whatever arrived within
//! `batch_wait`) and hands each batch to a [`BatchHandler`]. A failing batch
//! is logged, counted and dropped: delivery is at most once per batch.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::config::BatcherConfig;
use crate::core::queue::{dequeue, BoundedQueue, PutMode};
use crate::core::task::{self, catch_panic, Flow, Task, TaskResult};
use crate::core::{AppResult, WorkError};
use crate::infra::queue::ChannelQueue;

/// Consumer of drained batches.
pub trait BatchHandler<T>: Send + 'static {
    /// Handle one non-empty batch.
    ///
    /// # Errors
    ///
    /// The batch is dropped and the error logged.
    fn handle(&mut self, batch: Vec<T>) -> AppResult<()>;
}

impl<T, F> BatchHandler<T> for F
where
    F: FnMut(Vec<T>) -> AppResult<()> + Send + 'static,
{
    fn handle(&mut self, batch: Vec<T>) -> AppResult<()> {
        self(batch)
    }
}

/// Storage collaborator accepting batches of records.
pub trait Sink<T>: Send {
    /// Persist a batch.
    ///
    /// # Errors
    ///
    /// Any storage failure.
    fn add(&mut self, batch: Vec<T>) -> AppResult<()>;
}

/// Adapts a [`Sink`] into a [`BatchHandler`].
#[derive(Debug)]
pub struct SinkHandler<S>(pub S);

impl<T, S> BatchHandler<T> for SinkHandler<S>
where
    S: Sink<T> + 'static,
{
    fn handle(&mut self, batch: Vec<T>) -> AppResult<()> {
        self.0.add(batch)
    }
}

/// Snapshot of batcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Items currently queued.
    pub queued_items: usize,
    /// Items accepted by `put`.
    pub submitted_items: u64,
    /// Batches handled successfully.
    pub handled_batches: u64,
    /// Items in successful batches.
    pub handled_items: u64,
    /// Batches whose handler failed.
    pub failed_batches: u64,
    /// Items lost with failed batches.
    pub dropped_items: u64,
}

#[derive(Debug, Default)]
struct BatcherCounters {
    submitted_items: AtomicU64,
    handled_batches: AtomicU64,
    handled_items: AtomicU64,
    failed_batches: AtomicU64,
    dropped_items: AtomicU64,
}

impl BatcherCounters {
    fn snapshot(&self, queued_items: usize) -> BatcherStats {
        BatcherStats {
            queued_items,
            submitted_items: self.submitted_items.load(Ordering::Relaxed),
            handled_batches: self.handled_batches.load(Ordering::Relaxed),
            handled_items: self.handled_items.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            dropped_items: self.dropped_items.load(Ordering::Relaxed),
        }
    }
}

/// Bounded queue drained in batches by a background task.
pub struct Batcher<T, Q = ChannelQueue<T>>
where
    Q: BoundedQueue<T> + 'static,
{
    name: String,
    config: BatcherConfig,
    queue: Arc<Q>,
    closed: Arc<AtomicBool>,
    // Shared across the closed check and the enqueue; exclusive while closing.
    gate: RwLock<()>,
    counters: Arc<BatcherCounters>,
    task: Mutex<Option<Task>>,
    _item: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Batcher<T> {
    /// Start a batcher over a fresh in-process queue of
    /// `config.queue_capacity` items.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` for an invalid config, `WorkError::Worker`
    /// if the task cannot be started.
    pub fn new<H>(name: impl Into<String>, config: BatcherConfig, handler: H) -> Result<Self, WorkError>
    where
        H: BatchHandler<T>,
    {
        config.validate().map_err(WorkError::InvalidConfig)?;
        let queue = Arc::new(ChannelQueue::new(config.queue_capacity)?);
        Self::with_queue(name, config, queue, handler)
    }
}

impl<T, Q> Batcher<T, Q>
where
    T: Send + 'static,
    Q: BoundedQueue<T> + 'static,
{
    /// Start a batcher draining an existing queue. `config.queue_capacity`
    /// is ignored in favor of the queue's own.
    ///
    /// # Errors
    ///
    /// Same as [`Batcher::new`].
    pub fn with_queue<H>(
        name: impl Into<String>,
        config: BatcherConfig,
        queue: Arc<Q>,
        mut handler: H,
    ) -> Result<Self, WorkError>
    where
        H: BatchHandler<T>,
    {
        config.validate().map_err(WorkError::InvalidConfig)?;
        let name = name.into();
        let closed = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(BatcherCounters::default());

        let batch_size = config.batch_size;
        let batch_wait = config.batch_wait();
        let loop_queue = Arc::clone(&queue);
        let loop_closed = Arc::clone(&closed);
        let loop_counters = Arc::clone(&counters);
        let loop_name = name.clone();
        let mut task = Task::continuous(task_name(&name), move || -> TaskResult {
            let batch = dequeue(&*loop_queue, batch_size, Some(batch_wait), None);
            handle_batch(&loop_name, &mut handler, batch, &loop_counters);
            if !loop_closed.load(Ordering::Acquire) {
                return Ok(Flow::Continue);
            }
            loop {
                let rest = dequeue(&*loop_queue, 0, None, None);
                if rest.is_empty() {
                    break;
                }
                handle_batch(&loop_name, &mut handler, rest, &loop_counters);
            }
            Ok(Flow::Stop)
        });
        task.start()?;
        info!(batcher = %name, batch_size, batch_wait_ms = config.batch_wait_ms, "Batcher started");

        Ok(Self {
            name,
            config,
            queue,
            closed,
            gate: RwLock::new(()),
            counters,
            task: Mutex::new(Some(task)),
            _item: PhantomData,
        })
    }

    /// Enqueue with the configured backpressure policy.
    ///
    /// # Errors
    ///
    /// `QueueFull` or `Timeout` per the policy; `Disconnected` after shutdown.
    pub fn put(&self, item: T) -> Result<(), WorkError> {
        self.put_with(item, self.config.backpressure.put_mode())
    }

    /// Enqueue with an explicit put mode.
    ///
    /// # Errors
    ///
    /// Same as [`Batcher::put`].
    pub fn put_with(&self, item: T, mode: PutMode) -> Result<(), WorkError> {
        let _gate = self.gate.read();
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkError::Disconnected);
        }
        self.queue.put(item, mode)?;
        self.counters.submitted_items.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Batcher name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the thread that runs the handler.
    pub(crate) fn worker_thread(&self) -> String {
        task::thread_name(&task_name(&self.name))
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> BatcherStats {
        self.counters.snapshot(self.queue.len())
    }

    /// Refuse further puts, flush what is queued and wait for the task to
    /// exit. Returns within roughly `batch_wait` plus handler time.
    ///
    /// # Errors
    ///
    /// `WorkError::Worker` if the task thread panicked outside a callback.
    pub fn shutdown(&self) -> Result<(), WorkError> {
        {
            let _gate = self.gate.write();
            self.closed.store(true, Ordering::Release);
        }
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            task.join()?;
            info!(batcher = %self.name, "Batcher shut down");
        }
        Ok(())
    }
}

impl<T, Q> Drop for Batcher<T, Q>
where
    Q: BoundedQueue<T> + 'static,
{
    fn drop(&mut self) {
        // The task flushes and exits on its own; it is not joined here.
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(batcher = %self.name, "Batcher dropped without shutdown, flushing in background");
        }
    }
}

impl<T, Q> std::fmt::Debug for Batcher<T, Q>
where
    Q: BoundedQueue<T> + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn task_name(batcher: &str) -> String {
    format!("batcher-{batcher}")
}

fn handle_batch<T, H: BatchHandler<T>>(
    name: &str,
    handler: &mut H,
    batch: Vec<T>,
    counters: &BatcherCounters,
) {
    if batch.is_empty() {
        return;
    }
    let size = batch.len() as u64;
    match catch_panic(|| handler.handle(batch)) {
        Ok(()) => {
            counters.handled_batches.fetch_add(1, Ordering::Relaxed);
            counters.handled_items.fetch_add(size, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            counters.dropped_items.fetch_add(size, Ordering::Relaxed);
            error!(batcher = %name, items = size, error = %format!("{e:#}"), "Batch handler failed, batch dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn config(batch_size: usize, wait_ms: u64) -> BatcherConfig {
        BatcherConfig::new()
            .with_batch_size(batch_size)
            .with_batch_wait(Duration::from_millis(wait_ms))
            .with_queue_capacity(64)
    }

    #[test]
    fn test_full_batch_is_handled_before_wait() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&batches);
        let batcher = Batcher::new("full", config(3, 5_000), move |batch: Vec<u32>| -> AppResult<()> {
            seen.lock().push(batch);
            Ok(())
        })
        .unwrap();
        for i in 0..3 {
            batcher.put(i).unwrap();
        }
        thread::sleep(Duration::from_millis(200));
        assert_eq!(*batches.lock(), vec![vec![0, 1, 2]]);
        assert_eq!(batcher.stats().handled_items, 3);
    }

    #[test]
    fn test_failed_batch_is_dropped_and_counted() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let batcher = Batcher::new("failing", config(2, 50), move |_batch: Vec<u32>| -> AppResult<()> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("sink unavailable");
            }
            Ok(())
        })
        .unwrap();
        batcher.put(1).unwrap();
        batcher.put(2).unwrap();
        thread::sleep(Duration::from_millis(100));
        batcher.put(3).unwrap();
        batcher.shutdown().unwrap();

        let stats = batcher.stats();
        assert_eq!(stats.failed_batches, 1);
        assert!(stats.dropped_items >= 1);
        assert_eq!(stats.dropped_items + stats.handled_items, 3);
        assert_eq!(stats.submitted_items, 3);
    }

    #[test]
    fn test_shutdown_flushes_and_refuses_puts() {
        let total = Arc::new(AtomicU64::new(0));
        let sum = Arc::clone(&total);
        let batcher = Batcher::new("flush", config(100, 200), move |batch: Vec<u64>| -> AppResult<()> {
            sum.fetch_add(batch.iter().sum::<u64>(), Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        for i in 1..=10 {
            batcher.put(i).unwrap();
        }
        batcher.shutdown().unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 55);
        assert_eq!(batcher.put(11), Err(WorkError::Disconnected));
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Batcher::new("bad", config(0, 10), |_: Vec<u8>| -> AppResult<()> { Ok(()) });
        assert!(matches!(result, Err(WorkError::InvalidConfig(_))));
    }
}
