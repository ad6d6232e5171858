//! Pull-direction producer decoupling.
//!
//! A [`Streamer`] runs a periodic task that asks a [`BatchSource`] for up to
//! `batch_size` items following the last item it returned, and enqueues them
//! on a bounded queue. A full batch is followed right away by the next pull;
//! a short one means the source is drained for now, so the task waits
//! `batch_wait`. Consumers read with [`Streamer::get`] or iterate until the
//! source reports [`Pull::End`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::StreamerConfig;
use crate::core::queue::{BoundedQueue, PutMode};
use crate::core::task::{Flow, Task, TaskResult};
use crate::core::timer::{Timer, TimerStart};
use crate::core::{AppResult, WorkError};
use crate::infra::queue::ChannelQueue;
use crate::util::clock::SystemClock;

/// Answer of a [`BatchSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    /// Items following the previous batch; fewer than requested means the
    /// source is exhausted for the moment.
    Batch(Vec<T>),
    /// The source is finished for good.
    End,
}

/// Upstream source of a stream.
pub trait BatchSource<T>: Send + 'static {
    /// Load up to `batch_size` items following `last`, the final item of the
    /// previous successful batch (`None` on the first call).
    ///
    /// # Errors
    ///
    /// Logged; the same request is retried on the next tick.
    fn load(&mut self, last: Option<&T>, batch_size: usize) -> AppResult<Pull<T>>;
}

impl<T, F> BatchSource<T> for F
where
    F: FnMut(Option<&T>, usize) -> AppResult<Pull<T>> + Send + 'static,
{
    fn load(&mut self, last: Option<&T>, batch_size: usize) -> AppResult<Pull<T>> {
        self(last, batch_size)
    }
}

enum Message<T> {
    Item(T),
    End,
}

/// Bounded, eagerly filled stream of items from a [`BatchSource`].
pub struct Streamer<T> {
    name: String,
    queue: Arc<ChannelQueue<Message<T>>>,
    closed: Arc<AtomicBool>,
    ended: AtomicBool,
    _task: Task,
}

impl<T> Streamer<T>
where
    T: Clone + Send + 'static,
{
    /// Start streaming from `source`. The first pull happens immediately.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` for an invalid config, `WorkError::Worker`
    /// if the task cannot be started.
    pub fn new<S>(name: impl Into<String>, config: &StreamerConfig, mut source: S) -> Result<Self, WorkError>
    where
        S: BatchSource<T>,
    {
        config.validate().map_err(WorkError::InvalidConfig)?;
        let name = name.into();
        let queue = Arc::new(ChannelQueue::new(config.queue_capacity)?);
        let closed = Arc::new(AtomicBool::new(false));
        let timer = Timer::with_start(
            config.batch_wait(),
            TimerStart::Immediately,
            SystemClock::shared(),
        )?;

        let batch_size = config.batch_size;
        let loop_queue = Arc::clone(&queue);
        let loop_closed = Arc::clone(&closed);
        let loop_name = name.clone();
        let mut last: Option<T> = None;
        let mut task = Task::new(format!("streamer-{name}"), timer, move || -> TaskResult {
            if loop_closed.load(Ordering::Acquire) {
                return Ok(Flow::Stop);
            }
            let items = match source.load(last.as_ref(), batch_size)? {
                Pull::Batch(items) => items,
                Pull::End => {
                    loop_queue.put(Message::End, PutMode::Block)?;
                    info!(streamer = %loop_name, "Source ended");
                    return Ok(Flow::Stop);
                }
            };
            let full = items.len() >= batch_size;
            if let Some(item) = items.last() {
                last = Some(item.clone());
            }
            for item in items {
                // Drop drains the queue after setting `closed`, so at most
                // one blocked put completes before this check fires.
                if loop_closed.load(Ordering::Acquire) {
                    return Ok(Flow::Stop);
                }
                loop_queue.put(Message::Item(item), PutMode::Block)?;
            }
            Ok(if full { Flow::Repeat } else { Flow::Continue })
        });
        task.start()?;
        info!(streamer = %name, batch_size, "Streamer started");

        Ok(Self {
            name,
            queue,
            closed,
            ended: AtomicBool::new(false),
            _task: task,
        })
    }
}

impl<T: Send> Streamer<T> {
    /// Next item, blocking until one is available. `None` once the source
    /// has ended.
    pub fn get(&self) -> Option<T> {
        if self.ended.load(Ordering::Acquire) {
            return None;
        }
        match self.queue.get(None) {
            Ok(message) => self.open(message),
            Err(_) => None,
        }
    }

    /// Next item, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// `WorkError::Timeout` if nothing arrived in time.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<T>, WorkError> {
        if self.ended.load(Ordering::Acquire) {
            return Ok(None);
        }
        let message = self.queue.get(Some(timeout))?;
        Ok(self.open(message))
    }

    /// Blocking iterator over the remaining items.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.get())
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Streamer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, message: Message<T>) -> Option<T> {
        match message {
            Message::Item(item) => Some(item),
            Message::End => {
                self.ended.store(true, Ordering::Release);
                None
            }
        }
    }
}

impl<T: Send> Iterator for Streamer<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.get()
    }
}

impl<T> Drop for Streamer<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        let discarded = self.queue.clear();
        debug!(streamer = %self.name, discarded, "Streamer dropped");
    }
}

impl<T: Send> std::fmt::Debug for Streamer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streamer")
            .field("name", &self.name)
            .field("buffered", &self.queue.len())
            .field("ended", &self.ended.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
