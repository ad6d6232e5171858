//! Component configuration structures.
//!
//! Durations are carried as milliseconds so configs read naturally as JSON;
//! accessors hand out `Duration`s. Every struct validates itself and
//! constructors turn a failed validation into `WorkError::InvalidConfig`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::PutMode;

/// Default high-water mark for component queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// What producers experience when a component queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureConfig {
    /// Block until space frees up.
    #[default]
    Block,
    /// Fail the put immediately.
    Reject,
    /// Block for a bounded time, then fail.
    Timeout {
        /// Maximum wait in milliseconds.
        timeout_ms: u64,
    },
}

impl BackpressureConfig {
    /// The put mode this policy maps to.
    pub const fn put_mode(self) -> PutMode {
        match self {
            Self::Block => PutMode::Block,
            Self::Reject => PutMode::Reject,
            Self::Timeout { timeout_ms } => PutMode::Timeout(Duration::from_millis(timeout_ms)),
        }
    }
}

/// Batcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Items that trigger a batch before `batch_wait_ms` elapses.
    pub batch_size: usize,
    /// Longest time an item waits before its batch is handled.
    pub batch_wait_ms: u64,
    /// Queue high-water mark.
    pub queue_capacity: usize,
    /// Behavior of `put` on a full queue.
    pub backpressure: BackpressureConfig,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_wait_ms: 1_000,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: BackpressureConfig::Block,
        }
    }
}

impl BatcherConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the batch wait.
    #[must_use]
    pub fn with_batch_wait(mut self, batch_wait: Duration) -> Self {
        self.batch_wait_ms = u64::try_from(batch_wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the backpressure policy.
    #[must_use]
    pub const fn with_backpressure(mut self, backpressure: BackpressureConfig) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Batch wait as a duration.
    pub const fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.batch_wait_ms == 0 {
            return Err("batch_wait_ms must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        Ok(())
    }
}

/// Streamer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Items requested from the loader per call.
    pub batch_size: usize,
    /// Pause after a short batch.
    pub batch_wait_ms: u64,
    /// Queue high-water mark.
    pub queue_capacity: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_wait_ms: 1_000,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl StreamerConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the pause after a short batch.
    #[must_use]
    pub fn with_batch_wait(mut self, batch_wait: Duration) -> Self {
        self.batch_wait_ms = u64::try_from(batch_wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Pause after a short batch as a duration.
    pub const fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.batch_wait_ms == 0 {
            return Err("batch_wait_ms must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        Ok(())
    }
}

/// Cache configuration. `None` durations mean "never".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default age after which an entry is reloaded before being served.
    pub time_to_serve_ms: Option<u64>,
    /// Default idle time after which an entry is evicted.
    pub time_to_live_ms: Option<u64>,
    /// Eviction sweep period; defaults to `time_to_live_ms`. Required when
    /// entries carry their own time to live.
    pub sweep_period_ms: Option<u64>,
    /// High-water mark of the pending-refresh queue (async cache).
    pub refresh_queue_capacity: usize,
    /// Longest the refresher blocks waiting for keys before rechecking for
    /// shutdown (async cache).
    pub refresh_wait_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            time_to_serve_ms: None,
            time_to_live_ms: None,
            sweep_period_ms: None,
            refresh_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            refresh_wait_ms: 100,
        }
    }
}

impl CacheConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default time to serve.
    #[must_use]
    pub fn with_time_to_serve(mut self, tts: Duration) -> Self {
        self.time_to_serve_ms = Some(u64::try_from(tts.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the default time to live.
    #[must_use]
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live_ms = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the eviction sweep period.
    #[must_use]
    pub fn with_sweep_period(mut self, period: Duration) -> Self {
        self.sweep_period_ms = Some(u64::try_from(period.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the pending-refresh queue capacity.
    #[must_use]
    pub const fn with_refresh_queue_capacity(mut self, capacity: usize) -> Self {
        self.refresh_queue_capacity = capacity;
        self
    }

    /// Default time to serve as a duration.
    pub fn time_to_serve(&self) -> Option<Duration> {
        self.time_to_serve_ms.map(Duration::from_millis)
    }

    /// Default time to live as a duration.
    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live_ms.map(Duration::from_millis)
    }

    /// Eviction sweep period: the explicit one, else the default time to live.
    pub fn sweep_period(&self) -> Option<Duration> {
        self.sweep_period_ms
            .or(self.time_to_live_ms)
            .map(Duration::from_millis)
    }

    /// Refresher wait bound as a duration.
    pub const fn refresh_wait(&self) -> Duration {
        Duration::from_millis(self.refresh_wait_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_to_live_ms == Some(0) {
            return Err("time_to_live_ms must be greater than 0".into());
        }
        if self.sweep_period_ms == Some(0) {
            return Err("sweep_period_ms must be greater than 0".into());
        }
        if self.refresh_queue_capacity == 0 {
            return Err("refresh_queue_capacity must be greater than 0".into());
        }
        if self.refresh_wait_ms == 0 {
            return Err("refresh_wait_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Sequence reorderer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderConfig {
    /// Out-of-order window; `None` waits for every gap forever.
    pub max_ooo: Option<u64>,
    /// Period of the seen/lost log line; `None` disables it.
    pub loss_log_period_ms: Option<u64>,
}

impl ReorderConfig {
    /// Configuration with the given window.
    pub const fn with_window(max_ooo: u64) -> Self {
        Self {
            max_ooo: Some(max_ooo),
            loss_log_period_ms: None,
        }
    }

    /// Enable periodic loss logging.
    #[must_use]
    pub fn with_loss_log_period(mut self, period: Duration) -> Self {
        self.loss_log_period_ms = Some(u64::try_from(period.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Loss log period as a duration.
    pub fn loss_log_period(&self) -> Option<Duration> {
        self.loss_log_period_ms.map(Duration::from_millis)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.loss_log_period_ms == Some(0) {
            return Err("loss_log_period_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration: named component configs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    /// Batchers by name.
    pub batchers: HashMap<String, BatcherConfig>,
    /// Streamers by name.
    pub streamers: HashMap<String, StreamerConfig>,
    /// Caches by name.
    pub caches: HashMap<String, CacheConfig>,
    /// Reorderers by name.
    pub reorderers: HashMap<String, ReorderConfig>,
}

impl SubstrateConfig {
    /// Validate every component and ensure at least one is defined.
    ///
    /// # Errors
    ///
    /// Names the first invalid component.
    pub fn validate(&self) -> Result<(), String> {
        if self.batchers.is_empty()
            && self.streamers.is_empty()
            && self.caches.is_empty()
            && self.reorderers.is_empty()
        {
            return Err("at least one component must be defined".into());
        }
        for (name, cfg) in &self.batchers {
            cfg.validate()
                .map_err(|e| format!("batcher `{name}` invalid: {e}"))?;
        }
        for (name, cfg) in &self.streamers {
            cfg.validate()
                .map_err(|e| format!("streamer `{name}` invalid: {e}"))?;
        }
        for (name, cfg) in &self.caches {
            cfg.validate()
                .map_err(|e| format!("cache `{name}` invalid: {e}"))?;
        }
        for (name, cfg) in &self.reorderers {
            cfg.validate()
                .map_err(|e| format!("reorderer `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` (if present), then read the configuration from environment
    /// variable `var`, which holds either a JSON document or a path to one.
    ///
    /// # Errors
    ///
    /// Missing variable, unreadable file, parse or validation failure.
    pub fn from_env(var: &str) -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let raw = std::env::var(var).map_err(|e| format!("{var}: {e}"))?;
        if raw.trim_start().starts_with('{') {
            return Self::from_json_str(&raw);
        }
        let contents =
            std::fs::read_to_string(&raw).map_err(|e| format!("cannot read `{raw}`: {e}"))?;
        Self::from_json_str(&contents)
    }
}
