//! Single-flight loading across the fleet.
//!
//! On a miss, only the caller that wins the per-key distributed lock runs the loader;
//! everyone else backs off and re-reads until the winner has populated the store.
//!
//! ```text
//! caller ──▶ GET key ── hit ──▶ value
//!               │
//!              miss
//!               ▼
//!          SET lock:key NX ── won ──▶ GET key again ── hit ──▶ release, value
//!               │                          │
//!             lost                        miss
//!               ▼                          ▼
//!          sleep(backoff)            loader() ─▶ SET key ─▶ release, value
//!               │
//!               └──▶ retry (bounded by max_retries)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::StampedeConfig;
use crate::error::CacheError;
use crate::lock::DistributedLock;
use crate::metrics;
use crate::remote::{RemoteStore, get_json, write_back};

#[derive(Clone)]
pub struct StampedeGuard {
    store: Arc<dyn RemoteStore>,
    lock: DistributedLock,
    lock_ttl: Duration,
    retry_backoff: Duration,
    max_retries: u32,
}

impl StampedeGuard {
    pub fn new(store: Arc<dyn RemoteStore>, config: &StampedeConfig) -> Self {
        Self {
            lock: DistributedLock::new(Arc::clone(&store)),
            store,
            lock_ttl: config.lock_ttl(),
            retry_backoff: config.retry_backoff(),
            max_retries: config.max_retries,
        }
    }

    /// Return the cached value for `key`, letting at most one caller per lock TTL
    /// run `loader` on a miss.
    ///
    /// Gives up with [`CacheError::LockContention`] after `max_retries` backoffs without
    /// either seeing the value or winning the lock. The lock TTL should exceed the
    /// slowest loader; once it lapses another caller may start a second load.
    pub async fn load<T, E, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts: u32 = 0;

        loop {
            if let Some(value) = get_json::<T>(self.store.as_ref(), key).await? {
                tracing::debug!(key = %key, attempts, "cache hit");
                metrics::record_cache_hit("l2");
                return Ok(value);
            }

            let Some(guard) = self.lock.acquire(key, self.lock_ttl).await? else {
                attempts += 1;
                metrics::record_lock_contention();
                if attempts > self.max_retries {
                    tracing::warn!(key = %key, attempts, "gave up waiting for concurrent load");
                    return Err(CacheError::LockContention {
                        key: key.to_string(),
                        attempts,
                    }
                    .into());
                }
                tracing::debug!(key = %key, attempts, "load in progress elsewhere, backing off");
                tokio::time::sleep(self.retry_backoff).await;
                continue;
            };

            // The previous holder may have populated the key between our read and the lock.
            let outcome = match get_json::<T>(self.store.as_ref(), key).await {
                Ok(Some(value)) => {
                    metrics::record_cache_hit("l2");
                    Ok(value)
                }
                Ok(None) => {
                    tracing::debug!(key = %key, "cache miss, loading from origin");
                    metrics::record_cache_miss();
                    metrics::record_loader_call("single_flight");
                    match loader().await {
                        Ok(value) => {
                            write_back(self.store.as_ref(), key, &value, ttl).await;
                            Ok(value)
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e.into()),
            };

            if let Err(e) = guard.release().await {
                tracing::warn!(key = %key, error = %e, "failed to release load lock");
            }
            return outcome;
        }
    }

    /// [`load`](Self::load) bounded by a caller deadline.
    ///
    /// On expiry the in-flight work is dropped (releasing any held lock) and
    /// [`CacheError::Timeout`] is returned.
    pub async fn load_within<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        deadline: Duration,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(deadline, self.load(key, ttl, loader)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                operation: "single-flight load",
                after: deadline,
            }
            .into()),
        }
    }
}
