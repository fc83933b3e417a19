//! Cache-aside reads over the shared store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;
use crate::metrics;
use crate::remote::{RemoteStore, get_json, write_back};

/// Read-through over the shared store: serve a hit, otherwise load from the origin
/// and populate the store for `ttl`.
///
/// Concurrent misses on the same key each call the loader. Use
/// [`StampedeGuard`](crate::StampedeGuard) where that matters.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn RemoteStore>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Return the cached value for `key`, loading and caching it on a miss.
    ///
    /// A transport error on the initial read is returned without calling the loader.
    /// A loader error is returned as-is and nothing is cached. A failure writing the
    /// loaded value back is logged and the value is still returned.
    pub async fn load<T, E, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = get_json::<T>(self.store.as_ref(), key).await? {
            tracing::debug!(key = %key, "cache hit");
            metrics::record_cache_hit("l2");
            return Ok(value);
        }

        tracing::debug!(key = %key, "cache miss, loading from origin");
        metrics::record_cache_miss();
        metrics::record_loader_call("cache_aside");

        let value = loader().await?;
        write_back(self.store.as_ref(), key, &value, ttl).await;
        Ok(value)
    }

    /// Drop the cached value so the next read reloads it.
    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        self.store.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, set_json};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Post {
        id: u64,
        title: String,
    }

    fn post() -> Post {
        Post {
            id: 1,
            title: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_miss_loads_then_hit_skips_loader() {
        let store = Arc::new(MemoryRemoteStore::new());
        let aside = CacheAside::new(store.clone());
        let calls = AtomicU32::new(0);
        let ttl = Duration::from_secs(60);

        for _ in 0..3 {
            let loaded: Post = aside
                .load("post:1", ttl, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(post())
                })
                .await
                .unwrap();
            assert_eq!(loaded, post());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let cached: Option<Post> = get_json(&*store, "post:1").await.unwrap();
        assert_eq!(cached, Some(post()));
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_caches_nothing() {
        #[derive(Debug, thiserror::Error)]
        enum AppError {
            #[error("origin down")]
            OriginDown,
            #[error(transparent)]
            Cache(#[from] CacheError),
        }

        let store = Arc::new(MemoryRemoteStore::new());
        let aside = CacheAside::new(store.clone());

        let result: Result<Post, AppError> = aside
            .load("post:1", Duration::from_secs(60), || async {
                Err::<Post, _>(AppError::OriginDown)
            })
            .await;

        assert!(matches!(result, Err(AppError::OriginDown)));
        assert!(!store.exists("post:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_reloads() {
        let store = Arc::new(MemoryRemoteStore::new());
        let aside = CacheAside::new(store);
        let calls = AtomicU32::new(0);

        let load = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(post())
        };
        aside
            .load("post:1", Duration::from_millis(30), load)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        aside
            .load("post:1", Duration::from_millis(30), load)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_an_error() {
        let store = Arc::new(MemoryRemoteStore::new());
        set_json(&*store, "post:1", "not a post", Duration::from_secs(60))
            .await
            .unwrap();
        let aside = CacheAside::new(store);

        let result = aside
            .load("post:1", Duration::from_secs(60), || async {
                Ok::<_, CacheError>(post())
            })
            .await;

        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let store = Arc::new(MemoryRemoteStore::new());
        let aside = CacheAside::new(store);
        let calls = AtomicU32::new(0);
        let ttl = Duration::from_secs(60);

        let load = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(post())
        };
        aside.load("post:1", ttl, load).await.unwrap();
        assert!(aside.invalidate("post:1").await.unwrap());
        aside.load("post:1", ttl, load).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
