//! Runtime adapters.

#[cfg(feature = "tokio-runtime")]
pub mod tokio_bridge;

#[cfg(feature = "tokio-runtime")]
pub use tokio_bridge::LOOKUP_POLL_INTERVAL;
