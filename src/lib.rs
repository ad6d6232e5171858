//! # Batchwork
//!
//! Concurrency and queueing building blocks for long-running services and
//! batch jobs: periodic tasks, bounded queues with backpressure, batch
//! drains, pull-based streams, sequence reordering and staleness-aware
//! caches.
//!
//! ## Components
//!
//! - **Timer / Task**: drift-free periodic scheduling on a dedicated worker
//!   thread. Callback errors and panics are logged and the schedule goes on;
//!   a callback ends its task by returning [`core::Flow::Stop`].
//! - **Bounded queues**: [`infra::ChannelQueue`] in process and
//!   [`infra::PipeQueue`] across processes, both behind
//!   [`core::BoundedQueue`]. A full queue blocks, times out or rejects,
//!   depending on the [`core::PutMode`].
//! - **Batcher**: producers `put`, a background task hands batches to a
//!   handler or storage [`core::Sink`].
//! - **Streamer**: a background task pulls batches from a source and exposes
//!   them as a blocking iterator.
//! - **Reorderer**: in-order release of out-of-order sequence numbers with a
//!   bounded window and loss accounting.
//! - **Cache / `AsyncCache`**: per-entry time to serve and time to live, with
//!   synchronous or background batch loading.
//!
//! ## Batching writes
//!
//! ```rust,no_run
//! use batchwork::config::BatcherConfig;
//! use batchwork::core::{AppResult, Batcher};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), batchwork::core::WorkError> {
//! let batcher = Batcher::new(
//!     "rows",
//!     BatcherConfig::new()
//!         .with_batch_size(500)
//!         .with_batch_wait(Duration::from_secs(1)),
//!     |rows: Vec<String>| -> AppResult<()> {
//!         println!("inserting {} rows", rows.len());
//!         Ok(())
//!     },
//! )?;
//! batcher.put("row".to_string())?;
//! batcher.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Caching lookups
//!
//! ```rust,no_run
//! use batchwork::config::CacheConfig;
//! use batchwork::core::{AppResult, CacheBuilder};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheBuilder::new("users")
//!     .config(
//!         CacheConfig::new()
//!             .with_time_to_serve(Duration::from_secs(10))
//!             .with_time_to_live(Duration::from_secs(60)),
//!     )
//!     .build(|id: &u64| -> AppResult<Option<String>> { Ok(Some(format!("user-{id}"))) })?;
//! assert_eq!(cache.lookup(&7)?, "user-7");
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for batchers, streamers, caches and reorderers.
pub mod config;
/// Scheduling, queueing, ordering and caching primitives.
pub mod core;
/// Queue backends and storage sinks.
pub mod infra;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;
