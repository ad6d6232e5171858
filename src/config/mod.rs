//! Configuration models for batchers, streamers, caches and reorderers.

pub mod substrate;

pub use substrate::{
    BackpressureConfig, BatcherConfig, CacheConfig, ReorderConfig, StreamerConfig,
    SubstrateConfig,
};
