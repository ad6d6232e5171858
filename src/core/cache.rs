//! Staleness-aware key-value cache.
//!
//! Each entry records when it was written and when it was last read. An entry
//! older than its time to serve is reloaded before being served; an entry not
//! read for its time to live is evicted by a periodic sweep. Both policies are
//! per entry through [`Expiry`]. A loader answering "no value" is cached as
//! [`Slot::NotAvailable`] and reported as [`CacheError::NotFound`].

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::core::task::{Flow, Task, TaskResult};
use crate::core::timer::{Timer, TimerStart};
use crate::core::{AppResult, CacheError, WorkError};
use crate::util::clock::{duration_from_nanos, SharedClock, SystemClock};

/// Cached outcome of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<V> {
    /// The upstream value.
    Value(V),
    /// Upstream has nothing for this key.
    NotAvailable,
}

impl<V> Slot<V> {
    /// Slot for a loader answer.
    pub fn from_option(value: Option<V>) -> Self {
        value.map_or(Self::NotAvailable, Self::Value)
    }
}

impl<V: Clone> Slot<V> {
    pub(crate) fn served<K: Debug>(&self, key: &K) -> Result<V, CacheError> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::NotAvailable => Err(CacheError::NotFound(format!("{key:?}"))),
        }
    }
}

/// Per-entry freshness policy. `None` means "never".
pub trait Expiry<K, V>: Send + Sync + 'static {
    /// Age after which the entry must be reloaded before being served.
    fn time_to_serve(&self, key: &K, slot: &Slot<V>) -> Option<Duration>;

    /// Idle time after which the entry is evicted.
    fn time_to_live(&self, key: &K, slot: &Slot<V>) -> Option<Duration>;
}

/// Same policy for every entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedExpiry {
    /// Time to serve.
    pub time_to_serve: Option<Duration>,
    /// Time to live.
    pub time_to_live: Option<Duration>,
}

impl FixedExpiry {
    /// Policy from explicit durations.
    pub const fn new(time_to_serve: Option<Duration>, time_to_live: Option<Duration>) -> Self {
        Self {
            time_to_serve,
            time_to_live,
        }
    }

    /// Policy from a cache config.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.time_to_serve(), config.time_to_live())
    }
}

impl<K, V> Expiry<K, V> for FixedExpiry {
    fn time_to_serve(&self, _key: &K, _slot: &Slot<V>) -> Option<Duration> {
        self.time_to_serve
    }

    fn time_to_live(&self, _key: &K, _slot: &Slot<V>) -> Option<Duration> {
        self.time_to_live
    }
}

/// Synchronous upstream lookup.
pub trait Loader<K, V>: Send + Sync + 'static {
    /// Load the value for `key`; `Ok(None)` when upstream has none.
    ///
    /// # Errors
    ///
    /// Reported to the caller as `CacheError::Load`; nothing is cached.
    fn load(&self, key: &K) -> AppResult<Option<V>>;
}

impl<K, V, F> Loader<K, V> for F
where
    F: Fn(&K) -> AppResult<Option<V>> + Send + Sync + 'static,
{
    fn load(&self, key: &K) -> AppResult<Option<V>> {
        self(key)
    }
}

pub(crate) struct Entry<V> {
    pub(crate) slot: Slot<V>,
    write_time: Duration,
    read_nanos: AtomicU64,
}

impl<V> Entry<V> {
    fn new(slot: Slot<V>, now: Duration) -> Self {
        Self {
            slot,
            write_time: now,
            read_nanos: AtomicU64::new(nanos(now)),
        }
    }

    pub(crate) fn touch(&self, now: Duration) {
        self.read_nanos.fetch_max(nanos(now), Ordering::Relaxed);
    }

    fn read_time(&self) -> Duration {
        duration_from_nanos(u128::from(self.read_nanos.load(Ordering::Relaxed)))
    }
}

fn nanos(time: Duration) -> u64 {
    u64::try_from(time.as_nanos()).unwrap_or(u64::MAX)
}

fn exceeded(elapsed: Duration, limit: Option<Duration>) -> bool {
    limit.is_some_and(|limit| elapsed > limit)
}

/// Entries plus the policy and clock that age them. Shared by the cache
/// front end and its background tasks.
pub(crate) struct EntryStore<K, V> {
    pub(crate) entries: RwLock<HashMap<K, Entry<V>>>,
    expiry: Arc<dyn Expiry<K, V>>,
    pub(crate) clock: SharedClock,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + 'static,
    V: 'static,
{
    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    pub(crate) fn is_stale(&self, key: &K, entry: &Entry<V>, now: Duration) -> bool {
        exceeded(
            now.saturating_sub(entry.write_time),
            self.expiry.time_to_serve(key, &entry.slot),
        )
    }

    fn is_dead(&self, key: &K, entry: &Entry<V>, now: Duration) -> bool {
        exceeded(
            now.saturating_sub(entry.read_time()),
            self.expiry.time_to_live(key, &entry.slot),
        )
    }

    pub(crate) fn insert(&self, key: K, slot: Slot<V>, now: Duration) {
        self.entries.write().insert(key, Entry::new(slot, now));
    }

    pub(crate) fn insert_many<I>(&self, slots: I, now: Duration)
    where
        I: IntoIterator<Item = (K, Slot<V>)>,
    {
        let mut entries = self.entries.write();
        for (key, slot) in slots {
            entries.insert(key, Entry::new(slot, now));
        }
    }

    pub(crate) fn sweep(&self) -> usize {
        let now = self.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, entry| !self.is_dead(key, entry, now));
        before - entries.len()
    }

    pub(crate) fn invalidate(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Start the eviction task. It holds only a weak reference and stops once
/// the store is gone.
pub(crate) fn spawn_sweeper<K, V>(
    name: &str,
    store: &Arc<EntryStore<K, V>>,
    period: Duration,
) -> Result<Task, WorkError>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let weak: Weak<EntryStore<K, V>> = Arc::downgrade(store);
    let timer = Timer::with_start(period, TimerStart::AfterPeriod, Arc::clone(&store.clock))?;
    let cache = name.to_string();
    let mut task = Task::new(format!("cache-sweep-{name}"), timer, move || -> TaskResult {
        let Some(store) = weak.upgrade() else {
            return Ok(Flow::Stop);
        };
        let evicted = store.sweep();
        if evicted > 0 {
            debug!(cache = %cache, evicted, "Swept dead entries");
        }
        Ok(Flow::Continue)
    });
    task.start()?;
    Ok(task)
}

/// Cache that loads synchronously on a miss or a stale hit.
pub struct Cache<K, V> {
    name: String,
    store: Arc<EntryStore<K, V>>,
    loader: Box<dyn Loader<K, V>>,
    _sweeper: Option<Task>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Value for `key`, loading it first if absent or stale.
    ///
    /// # Errors
    ///
    /// `NotFound` if upstream has no value, `Load` if the loader failed.
    pub fn lookup(&self, key: &K) -> Result<V, CacheError> {
        let now = self.store.now();
        {
            let entries = self.store.entries.read();
            if let Some(entry) = entries.get(key) {
                if !self.store.is_stale(key, entry, now) {
                    entry.touch(now);
                    return entry.slot.served(key);
                }
            }
        }

        let slot = match self.loader.load(key) {
            Ok(value) => Slot::from_option(value),
            Err(e) => {
                warn!(cache = %self.name, key = ?key, error = %format!("{e:#}"), "Cache load failed");
                return Err(CacheError::Load(format!("{e:#}")));
            }
        };
        let served = slot.served(key);
        self.store.insert(key.clone(), slot, now);
        served
    }

    /// Evict dead entries now; returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }

    /// Drop `key`'s entry; the next lookup reloads it.
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

impl<K, V> Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("entries", &self.store.entries.read().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Cache`] and [`crate::core::AsyncCache`].
pub struct CacheBuilder<K, V> {
    pub(crate) name: String,
    pub(crate) config: CacheConfig,
    pub(crate) expiry: Option<Arc<dyn Expiry<K, V>>>,
    pub(crate) clock: SharedClock,
    pub(crate) sweeper: bool,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builder with default config, system clock and a sweeper.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CacheConfig::default(),
            expiry: None,
            clock: SystemClock::shared(),
            sweeper: true,
        }
    }

    /// Use `config`. Its durations become the default [`FixedExpiry`]; its
    /// sweep period (else its time to live) paces eviction.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the fixed policy with a per-entry one. Unless the sweeper is
    /// disabled, the config must then carry a sweep period.
    #[must_use]
    pub fn expiry(mut self, expiry: impl Expiry<K, V>) -> Self {
        let expiry: Arc<dyn Expiry<K, V>> = Arc::new(expiry);
        self.expiry = Some(expiry);
        self
    }

    /// Use another clock.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Do not start the eviction task; call `sweep` explicitly.
    #[must_use]
    pub const fn without_sweeper(mut self) -> Self {
        self.sweeper = false;
        self
    }

    /// Build a synchronously loading cache.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` for an invalid config or a per-entry
    /// expiry without a sweep period, `WorkError::Worker` if the sweeper
    /// cannot be started.
    pub fn build<L>(self, loader: L) -> Result<Cache<K, V>, WorkError>
    where
        L: Loader<K, V>,
    {
        let (store, sweeper) = self.store()?;
        Ok(Cache {
            name: self.name,
            store,
            loader: Box::new(loader),
            _sweeper: sweeper,
        })
    }

    pub(crate) fn store(&self) -> Result<(Arc<EntryStore<K, V>>, Option<Task>), WorkError> {
        self.config.validate().map_err(WorkError::InvalidConfig)?;
        let expiry: Arc<dyn Expiry<K, V>> = match &self.expiry {
            Some(expiry) => Arc::clone(expiry),
            None => Arc::new(FixedExpiry::from_config(&self.config)),
        };
        let store = Arc::new(EntryStore {
            entries: RwLock::new(HashMap::new()),
            expiry,
            clock: Arc::clone(&self.clock),
        });
        let sweeper = match (self.sweeper, self.config.sweep_period()) {
            (true, Some(period)) => Some(spawn_sweeper(&self.name, &store, period)?),
            (true, None) if self.expiry.is_some() => {
                return Err(WorkError::InvalidConfig(format!(
                    "cache `{}`: per-entry expiry needs a sweep period",
                    self.name
                )));
            }
            _ => None,
        };
        Ok((store, sweeper))
    }
}

impl<K, V> Debug for CacheBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("sweeper", &self.sweeper)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn counted_loader(loads: &Arc<AtomicUsize>) -> impl Loader<String, u32> {
        let loads = Arc::clone(loads);
        move |key: &String| -> AppResult<Option<u32>> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(match key.as_str() {
                "a" => Some(1),
                "b" => Some(2),
                _ => None,
            })
        }
    }

    fn cache(clock: &ManualClock, loads: &Arc<AtomicUsize>) -> Cache<String, u32> {
        CacheBuilder::new("test")
            .config(
                CacheConfig::new()
                    .with_time_to_serve(Duration::from_secs(10))
                    .with_time_to_live(Duration::from_secs(5)),
            )
            .clock(clock.shared())
            .without_sweeper()
            .build(counted_loader(loads))
            .unwrap()
    }

    #[test]
    fn test_fresh_hit_skips_loader() {
        let clock = ManualClock::at_secs(0);
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(&clock, &loads);
        assert_eq!(cache.lookup(&"a".into()), Ok(1));
        clock.set_secs(3);
        assert_eq!(cache.lookup(&"a".into()), Ok(1));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_entry_reloads() {
        let clock = ManualClock::at_secs(0);
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(&clock, &loads);
        cache.lookup(&"a".into()).unwrap();
        clock.set_secs(10);
        cache.lookup(&"a".into()).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        clock.set_secs(12);
        cache.lookup(&"a".into()).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_negative_result_is_cached() {
        let clock = ManualClock::at_secs(0);
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(&clock, &loads);
        assert_eq!(cache.lookup(&"c".into()), Err(CacheError::NotFound("\"c\"".into())));
        assert_eq!(cache.lookup(&"c".into()), Err(CacheError::NotFound("\"c\"".into())));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_evicts_idle_entries() {
        let clock = ManualClock::at_secs(0);
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(&clock, &loads);
        cache.lookup(&"a".into()).unwrap();
        cache.lookup(&"b".into()).unwrap();
        clock.set_secs(3);
        cache.lookup(&"a".into()).unwrap();
        clock.set_secs(8);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&"a".into()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_loader_error_not_cached() {
        let cache: Cache<u8, u8> = CacheBuilder::new("failing")
            .without_sweeper()
            .build(|_: &u8| -> AppResult<Option<u8>> { anyhow::bail!("backend down") })
            .unwrap();
        assert!(matches!(cache.lookup(&1), Err(CacheError::Load(_))));
        assert!(cache.is_empty());
    }

    struct ShortNegative;

    impl Expiry<String, u32> for ShortNegative {
        fn time_to_serve(&self, _key: &String, slot: &Slot<u32>) -> Option<Duration> {
            match slot {
                Slot::Value(_) => None,
                Slot::NotAvailable => Some(Duration::from_secs(1)),
            }
        }

        fn time_to_live(&self, _key: &String, _slot: &Slot<u32>) -> Option<Duration> {
            None
        }
    }

    #[test]
    fn test_per_entry_expiry() {
        let clock = ManualClock::at_secs(0);
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = CacheBuilder::new("policy")
            .expiry(ShortNegative)
            .clock(clock.shared())
            .without_sweeper()
            .build(counted_loader(&loads))
            .unwrap();
        let _ = cache.lookup(&"a".into());
        let _ = cache.lookup(&"z".into());
        clock.set_secs(100);
        let _ = cache.lookup(&"a".into());
        let _ = cache.lookup(&"z".into());
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }
}
