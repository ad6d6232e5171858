//! Async wrappers over the blocking primitives.
//!
//! Blocking calls run on Tokio's blocking pool so they never stall a runtime
//! worker thread.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::{AsyncCache, Batcher, BoundedQueue, CacheError, Streamer, WorkError};

/// Poll interval of [`AsyncCache::lookup_wait`].
pub const LOOKUP_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl<T, Q> Batcher<T, Q>
where
    T: Send + 'static,
    Q: BoundedQueue<T> + 'static,
{
    /// [`Batcher::put`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Batcher::put`], or `WorkError::Worker` if the blocking task
    /// was cancelled or panicked.
    pub async fn put_async(self: &Arc<Self>, item: T) -> Result<(), WorkError> {
        let batcher = Arc::clone(self);
        tokio::task::spawn_blocking(move || batcher.put(item))
            .await
            .map_err(|e| WorkError::Worker(format!("blocking put failed: {e}")))?
    }
}

impl<T> Streamer<T>
where
    T: Send + 'static,
{
    /// [`Streamer::get_timeout`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// `WorkError::Timeout` if nothing arrived in time, `WorkError::Worker`
    /// if the blocking task was cancelled or panicked.
    pub async fn get_async(self: &Arc<Self>, timeout: Duration) -> Result<Option<T>, WorkError> {
        let streamer = Arc::clone(self);
        tokio::task::spawn_blocking(move || streamer.get_timeout(timeout))
            .await
            .map_err(|e| WorkError::Worker(format!("blocking get failed: {e}")))?
    }
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Look `key` up, waiting up to `timeout` for a pending first load
    /// instead of failing with `RefreshInProgress`.
    ///
    /// # Errors
    ///
    /// `NotFound` if upstream has no value; `RefreshInProgress` if the load
    /// did not finish within `timeout`.
    pub async fn lookup_wait(&self, key: &K, timeout: Duration) -> Result<V, CacheError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.lookup(key) {
                Err(CacheError::RefreshInProgress(pending)) => {
                    if Instant::now() >= deadline {
                        return Err(CacheError::RefreshInProgress(pending));
                    }
                    tokio::time::sleep(LOOKUP_POLL_INTERVAL).await;
                }
                other => return other,
            }
        }
    }
}
