//! Cache refreshed in the background.
//!
//! A lookup never waits on the loader. A missing or stale key is queued for
//! refresh and the lookup answers with whatever is cached: the previous value,
//! or [`CacheError::RefreshInProgress`] if there is none yet. A refresher task
//! drains pending keys in batches, loads them with one [`BulkLoader`] call and
//! writes an entry for every requested key; keys the loader left out become
//! [`Slot::NotAvailable`].

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::cache::{CacheBuilder, EntryStore, Slot};
use crate::core::queue::{dequeue, BoundedQueue, PutMode};
use crate::core::task::{catch_panic, Flow, Task};
use crate::core::{AppResult, CacheError, WorkError};
use crate::infra::queue::ChannelQueue;

/// Batch upstream lookup used by [`AsyncCache`].
pub trait BulkLoader<K, V>: Send + 'static {
    /// Load values for `keys`. Keys absent from the answer have no value.
    ///
    /// # Errors
    ///
    /// Logged; the keys keep their previous state and are retried on their
    /// next lookup.
    fn load_batch(&mut self, keys: &[K]) -> AppResult<Vec<(K, V)>>;
}

impl<K, V, F> BulkLoader<K, V> for F
where
    F: FnMut(&[K]) -> AppResult<Vec<(K, V)>> + Send + 'static,
{
    fn load_batch(&mut self, keys: &[K]) -> AppResult<Vec<(K, V)>> {
        self(keys)
    }
}

/// Cache whose loads happen on a background task.
pub struct AsyncCache<K, V> {
    name: String,
    store: Arc<EntryStore<K, V>>,
    queue: Arc<ChannelQueue<K>>,
    in_flight: Arc<Mutex<HashSet<K>>>,
    closed: Arc<AtomicBool>,
    _refresher: Task,
    _sweeper: Option<Task>,
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Cached value for `key`, requesting a refresh if it is missing or
    /// stale. Never blocks on the loader.
    ///
    /// # Errors
    ///
    /// `RefreshInProgress` if nothing is cached yet, `NotFound` if the cached
    /// answer is "no value".
    pub fn lookup(&self, key: &K) -> Result<V, CacheError> {
        let now = self.store.now();
        let cached = {
            let entries = self.store.entries.read();
            match entries.get(key) {
                Some(entry) => {
                    entry.touch(now);
                    if !self.store.is_stale(key, entry, now) {
                        return entry.slot.served(key);
                    }
                    Some(entry.slot.served(key))
                }
                None => None,
            }
        };
        self.request_refresh(key);
        cached.unwrap_or_else(|| Err(CacheError::RefreshInProgress(format!("{key:?}"))))
    }

    fn request_refresh(&self, key: &K) {
        if !self.in_flight.lock().insert(key.clone()) {
            return;
        }
        if let Err(e) = self.queue.put(key.clone(), PutMode::Reject) {
            self.in_flight.lock().remove(key);
            warn!(cache = %self.name, key = ?key, error = %e, "Refresh request dropped");
        }
    }

    /// Keys queued or being loaded.
    pub fn pending(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Evict dead entries now; returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }

    /// Drop `key`'s entry; the next lookup requests a reload.
    pub fn invalidate(&self, key: &K) -> bool {
        self.store.invalidate(key)
    }

    /// Number of entries, including negative ones.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<K, V> Drop for AsyncCache<K, V> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl<K, V> Debug for AsyncCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCache")
            .field("name", &self.name)
            .field("entries", &self.store.entries.read().len())
            .field("pending", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build a background-refreshed cache.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` for an invalid config, `WorkError::Worker`
    /// if a background task cannot be started.
    pub fn build_async<B>(self, loader: B) -> Result<AsyncCache<K, V>, WorkError>
    where
        B: BulkLoader<K, V>,
    {
        let (store, sweeper) = self.store()?;
        let queue = Arc::new(ChannelQueue::new(self.config.refresh_queue_capacity)?);
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let mut refresher = Refresher {
            name: self.name.clone(),
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
            in_flight: Arc::clone(&in_flight),
            closed: Arc::clone(&closed),
            loader,
            limit: self.config.refresh_queue_capacity,
        };
        let wait = self.config.refresh_wait();
        let mut task = Task::continuous(format!("cache-refresh-{}", self.name), move || {
            refresher.run_once(wait)
        });
        task.start()?;
        info!(cache = %self.name, "Async cache started");

        Ok(AsyncCache {
            name: self.name,
            store,
            queue,
            in_flight,
            closed,
            _refresher: task,
            _sweeper: sweeper,
        })
    }
}

struct Refresher<K, V, B> {
    name: String,
    store: Arc<EntryStore<K, V>>,
    queue: Arc<ChannelQueue<K>>,
    in_flight: Arc<Mutex<HashSet<K>>>,
    closed: Arc<AtomicBool>,
    loader: B,
    limit: usize,
}

impl<K, V, B> Refresher<K, V, B>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: BulkLoader<K, V>,
{
    fn run_once(&mut self, wait: std::time::Duration) -> AppResult<Flow> {
        if self.closed.load(Ordering::Acquire) {
            debug!(cache = %self.name, "Refresher stopping");
            return Ok(Flow::Stop);
        }
        let mut seen = HashSet::new();
        let keys: Vec<K> = dequeue(&*self.queue, 1, Some(wait), Some(self.limit))
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();
        if keys.is_empty() {
            return Ok(Flow::Continue);
        }

        let loader = &mut self.loader;
        let result = catch_panic(|| loader.load_batch(&keys));
        match result {
            Ok(pairs) => {
                let mut values: HashMap<K, V> = pairs.into_iter().collect();
                let now = self.store.now();
                self.store.insert_many(
                    keys.iter()
                        .map(|key| (key.clone(), Slot::from_option(values.remove(key)))),
                    now,
                );
                debug!(cache = %self.name, keys = keys.len(), "Refreshed batch");
            }
            Err(e) => {
                error!(cache = %self.name, keys = keys.len(), error = %format!("{e:#}"), "Bulk load failed");
            }
        }
        let mut in_flight = self.in_flight.lock();
        for key in &keys {
            in_flight.remove(key);
        }
        Ok(Flow::Continue)
    }
}
