//! Scheduling, queueing, ordering and caching primitives.

pub mod async_cache;
pub mod batcher;
pub mod cache;
pub mod error;
pub mod leaky_bucket;
pub mod queue;
pub mod reorder;
pub mod streamer;
pub mod task;
pub mod timer;
pub mod worker;

pub use async_cache::{AsyncCache, BulkLoader};
pub use batcher::{BatchHandler, Batcher, BatcherStats, Sink, SinkHandler};
pub use cache::{Cache, CacheBuilder, Expiry, FixedExpiry, Loader, Slot};
pub use error::{AppResult, CacheError, WorkError};
pub use leaky_bucket::LeakyBucket;
pub use queue::{dequeue, BoundedQueue, PutMode, QueueIter};
pub use reorder::{reordered, LossStats, Reordered, Reorderer, Sequenced};
pub use streamer::{BatchSource, Pull, Streamer};
pub use task::{Callback, Flow, ProcessCallback, Task, TaskResult, TaskState, STOP_EXIT_CODE};
pub use timer::{Timer, TimerStart, MAX_SLEEP_SLICE};
pub use worker::{ProcessWorker, ThreadWorker, Worker, WorkerState};
