//! Infrastructure adapters: queue backends and storage sinks.

pub mod queue;
pub mod sink;

pub use queue::{ChannelQueue, PipeQueue};
pub use sink::{InMemorySink, LogRecord, StoreLayer};
