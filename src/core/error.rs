//! Error types for scheduling, queueing and cache operations.

use thiserror::Error;

/// Errors produced by workers, tasks and queues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// The queue is at its high-water mark and the put was rejected.
    #[error("queue full: capacity {capacity}")]
    QueueFull {
        /// High-water mark of the queue.
        capacity: usize,
    },
    /// A blocking operation gave up waiting.
    #[error("operation timed out")]
    Timeout,
    /// The other end of a queue has gone away.
    #[error("queue disconnected")]
    Disconnected,
    /// Construction rejected an invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker could not be started or joined.
    #[error("worker error: {0}")]
    Worker(String),
    /// A process-backed worker exited unsuccessfully.
    #[error("process `{name}` exited with code {code:?}")]
    ProcessExit {
        /// Worker name.
        name: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },
    /// Encoding, decoding or pipe I/O failed on a cross-process queue.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors observed by cache readers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The upstream source has no value for the key.
    #[error("key not found: {0}")]
    NotFound(String),
    /// No value is cached yet; a background refresh has been requested.
    #[error("refresh in progress: {0}")]
    RefreshInProgress(String),
    /// The synchronous loader failed.
    #[error("load failed: {0}")]
    Load(String),
}

/// Application-facing result used by every user-supplied callback.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_error_display() {
        assert_eq!(
            WorkError::QueueFull { capacity: 8 }.to_string(),
            "queue full: capacity 8"
        );
        assert_eq!(
            WorkError::ProcessExit {
                name: "loader".into(),
                code: Some(2)
            }
            .to_string(),
            "process `loader` exited with code Some(2)"
        );
    }

    #[test]
    fn test_cache_error_display() {
        assert_eq!(
            CacheError::RefreshInProgress("\"a\"".into()).to_string(),
            "refresh in progress: \"a\""
        );
    }
}
