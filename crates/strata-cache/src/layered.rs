//! Two-tier reads: process-local first, then the shared store, then the origin.
//!
//! ```text
//! L1 hit ──────────────────────────────────────────▶ value
//! L1 miss ─▶ L2 hit ─▶ back-fill L1 ────────────────▶ value
//! L1 miss ─▶ L2 miss/outage ─▶ loader ─▶ L1 + L2 ───▶ value
//! L1 miss ─▶ L2 undecodable ────────────────────────▶ error
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;
use crate::local::LocalStore;
use crate::metrics;
use crate::remote::{RemoteStore, get_json, write_back};

pub struct LayeredReader<T> {
    local: Arc<LocalStore<T>>,
    store: Arc<dyn RemoteStore>,
}

impl<T> Clone for LayeredReader<T> {
    fn clone(&self) -> Self {
        Self {
            local: Arc::clone(&self.local),
            store: Arc::clone(&self.store),
        }
    }
}

impl<T> LayeredReader<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(local: Arc<LocalStore<T>>, store: Arc<dyn RemoteStore>) -> Self {
        Self { local, store }
    }

    pub fn local(&self) -> &Arc<LocalStore<T>> {
        &self.local
    }

    /// Return the value for `key` from the nearest tier that has it.
    ///
    /// An L2 hit is copied into L1 for `l1_ttl`. On a full miss `loader` runs and its
    /// value is written to L1 (`l1_ttl`) and L2 (`l2_ttl`). An L2 transport failure
    /// (network, pool, timeout) is logged and treated as a miss, so the origin is
    /// consulted rather than failing the read. A value L2 returns but that cannot be
    /// decoded is an error.
    pub async fn load<E, F, Fut>(
        &self,
        key: &str,
        l1_ttl: Duration,
        l2_ttl: Duration,
        loader: F,
    ) -> Result<T, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.local.get(key) {
            metrics::record_cache_hit("l1");
            return Ok(value);
        }

        match get_json::<T>(self.store.as_ref(), key).await {
            Ok(Some(value)) => {
                tracing::debug!(key = %key, "L2 hit, back-filling L1");
                metrics::record_cache_hit("l2");
                self.local.set(key, value.clone(), l1_ttl);
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if !e.is_transport() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    backend = self.store.name(),
                    error = %e,
                    "L2 read failed, loading from origin"
                );
            }
        }

        metrics::record_cache_miss();
        metrics::record_loader_call("layered");

        let value = loader().await?;
        self.local.set(key, value.clone(), l1_ttl);
        write_back(self.store.as_ref(), key, &value, l2_ttl).await;
        Ok(value)
    }

    /// Drop `key` from both tiers.
    pub async fn invalidate(&self, key: &str) -> crate::Result<()> {
        self.local.delete(key);
        self.store.delete(key).await?;
        Ok(())
    }
}
