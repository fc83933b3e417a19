//! Shared (L2) store.
//!
//! ## Backends
//!
//! - [`RedisStore`]: pooled Redis connections, shared by every instance of the fleet
//! - [`MemoryRemoteStore`]: in-process implementation of the same contract, used when
//!   Redis is disabled or unreachable, and in tests
//!
//! Every call is a future: dropping it (e.g. from `tokio::time::timeout` around a
//! request) cancels the in-flight operation. `RedisStore` additionally bounds each
//! command by its configured read/write timeout.

mod memory;
mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::RedisConfig;
use crate::error::Result;

pub use memory::MemoryRemoteStore;
pub use redis_store::RedisStore;

/// Contract of the shared cache tier.
///
/// Values are opaque bytes; [`get_json`] and [`set_json`] layer the JSON encoding
/// used by the read paths on top.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a value. `Ok(None)` means the key is absent; `Err` is a transport fault.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value with a TTL, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Store a value only if the key is absent. Returns whether this call created it.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete a key only if it currently holds `expected`. Atomic.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern (`*`, `?`, `[...]`).
    /// Returns the number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64>;

    /// Set fields of a hash, creating it if needed.
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// All fields of a hash; empty when the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Check connectivity (for health checks).
    async fn ping(&self) -> Result<()>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Fetch and decode a JSON value.
pub async fn get_json<T>(store: &dyn RemoteStore, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it with a TTL.
pub async fn set_json<T>(
    store: &dyn RemoteStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    store.set(key, &bytes, ttl).await
}

/// Write a freshly loaded value back to the shared store.
///
/// The value is already in hand, so a failed write is logged and swallowed.
pub(crate) async fn write_back<T>(store: &dyn RemoteStore, key: &str, value: &T, ttl: Duration)
where
    T: Serialize + ?Sized,
{
    if let Err(e) = set_json(store, key, value, ttl).await {
        tracing::warn!(
            key = %key,
            backend = store.name(),
            error = %e,
            "failed to write loaded value to shared store"
        );
    }
}

/// Create the shared store from configuration.
///
/// ## Graceful Degradation
///
/// - **Redis disabled**: returns an in-process store
/// - **Redis enabled**: connects and pings; on failure falls back to the in-process store
///
/// In fallback mode locks and cached values are no longer shared between instances.
/// Background upkeep runs every `reap_interval` until `shutdown` is cancelled: idle
/// pooled connections are reaped when connected, expired keys are swept otherwise.
pub async fn connect_remote_store(
    config: &RedisConfig,
    shutdown: &CancellationToken,
) -> Arc<dyn RemoteStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process shared store");
        return in_process_store(config, shutdown);
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let store = match RedisStore::connect(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-process store."
            );
            return in_process_store(config, shutdown);
        }
    };

    match store.ping().await {
        Ok(()) => {
            tracing::info!("Connected to Redis");
            store.spawn_idle_reaper(config.reap_interval(), shutdown.clone());
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-process store."
            );
            in_process_store(config, shutdown)
        }
    }
}

fn in_process_store(config: &RedisConfig, shutdown: &CancellationToken) -> Arc<dyn RemoteStore> {
    let store = Arc::new(MemoryRemoteStore::new());
    store.spawn_sweeper(config.reap_interval(), shutdown.child_token());
    store
}
