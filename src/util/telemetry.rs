//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Initialize tracing/telemetry. Users can install their own subscriber; this
/// helper installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Initialize tracing with an extra layer next to the fmt output, typically a
/// [`StoreLayer`](crate::infra::sink::StoreLayer) persisting logs in batches.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing_with_store<L>(store: L) -> bool
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    if tracing::dispatcher::has_been_set() {
        return false;
    }
    tracing_subscriber::registry()
        .with(store)
        .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
        .try_init()
        .is_ok()
}
