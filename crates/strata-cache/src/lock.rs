//! Distributed lock over the shared store.
//!
//! A lock is the key `"lock:{key}"` created with create-if-absent and a TTL. The
//! value is a random per-acquisition token; release deletes the key only while it
//! still holds that token, so a holder whose TTL lapsed cannot release a lock that
//! someone else acquired afterwards.
//!
//! ```text
//! Instance A: SET lock:k <tokenA> NX PX ttl  → OK       (acquired)
//! Instance B: SET lock:k <tokenB> NX PX ttl  → nil      (held elsewhere)
//! Instance A: DEL lock:k if value == tokenA  → 1        (released)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::remote::RemoteStore;

pub const LOCK_PREFIX: &str = "lock:";

/// Shared-store key guarding `key`.
pub fn lock_key(key: &str) -> String {
    format!("{LOCK_PREFIX}{key}")
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn RemoteStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Try to take the lock for `key`.
    ///
    /// Returns `Ok(None)` when another holder has it; contention is not an error.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let lock_key = lock_key(key);
        let token = Uuid::new_v4().to_string();

        if self
            .store
            .set_if_absent(&lock_key, token.as_bytes(), ttl)
            .await?
        {
            tracing::debug!(key = %lock_key, ttl_ms = ttl.as_millis() as u64, "lock acquired");
            Ok(Some(LockGuard {
                store: Arc::clone(&self.store),
                key: lock_key,
                token,
                released: false,
            }))
        } else {
            tracing::debug!(key = %lock_key, "lock held elsewhere");
            Ok(None)
        }
    }

    /// Delete the lock regardless of who holds it.
    ///
    /// For operators clearing a stuck lock; holders should use [`LockGuard::release`].
    pub async fn force_release(&self, key: &str) -> Result<bool> {
        let lock_key = lock_key(key);
        let removed = self.store.delete(&lock_key).await?;
        if removed {
            tracing::info!(key = %lock_key, "lock force-released");
        }
        Ok(removed)
    }

    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        self.store.exists(&lock_key(key)).await
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// If the lock is held elsewhere, returns `Ok(None)` without running `f`. Otherwise
    /// returns `f`'s result wrapped in `Some`. The lock is released when `f` finishes,
    /// and also if `f` panics or this future is dropped part-way.
    pub async fn with_lock<R, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        f: F,
    ) -> std::result::Result<Option<R>, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
    {
        let Some(guard) = self.acquire(key, ttl).await? else {
            return Ok(None);
        };

        let outcome = f().await;

        if let Err(e) = guard.release().await {
            tracing::warn!(
                key = %key,
                error = %e,
                "failed to release lock; it will expire by TTL"
            );
        }

        outcome.map(Some)
    }
}

/// Proof of holding a lock. Release explicitly with [`release`](Self::release);
/// a guard dropped without release (panic, cancellation) releases in the background.
pub struct LockGuard {
    store: Arc<dyn RemoteStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    /// Full shared-store key of the lock.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value stored under the lock key while this guard owns it.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock if this guard still owns it.
    ///
    /// Returns `false` when the TTL already lapsed (and possibly someone else holds it now).
    pub async fn release(mut self) -> Result<bool> {
        let result = self
            .store
            .compare_and_delete(&self.key, self.token.as_bytes())
            .await;
        self.released = true;

        match &result {
            Ok(true) => tracing::debug!(key = %self.key, "lock released"),
            Ok(false) => tracing::warn!(key = %self.key, "lock expired before release"),
            Err(_) => {}
        }
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Without a runtime the TTL is the only way out.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            match store.compare_and_delete(&key, token.as_bytes()).await {
                Ok(_) => tracing::debug!(key = %key, "lock released after abandoned guard"),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to release abandoned lock")
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn lock() -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryRemoteStore::new()))
    }

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let lock = lock();
        let ttl = Duration::from_secs(10);

        let first = lock.acquire("post:1", ttl).await.unwrap();
        assert!(first.is_some());
        assert!(lock.acquire("post:1", ttl).await.unwrap().is_none());

        assert!(first.unwrap().release().await.unwrap());
        assert!(lock.acquire("post:1", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_key_is_prefixed() {
        let store = Arc::new(MemoryRemoteStore::new());
        let lock = DistributedLock::new(store.clone());

        let guard = lock
            .acquire("post:1", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(guard.key(), "lock:post:1");
        assert_eq!(
            store.get("lock:post:1").await.unwrap(),
            Some(guard.token().as_bytes().to_vec())
        );
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_ttl_bounds_lock_lifetime() {
        let lock = lock();
        let _held = lock
            .acquire("k", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            lock.acquire("k", Duration::from_secs(10))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_new_lock() {
        let lock = lock();
        let stale = lock
            .acquire("k", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let current = lock
            .acquire("k", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        assert!(!stale.release().await.unwrap());
        assert!(lock.is_locked("k").await.unwrap());

        assert!(current.release().await.unwrap());
        assert!(!lock.is_locked("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_force_release_ignores_token() {
        let lock = lock();
        let _guard = lock.acquire("k", Duration::from_secs(10)).await.unwrap();

        assert!(lock.force_release("k").await.unwrap());
        assert!(!lock.is_locked("k").await.unwrap());
        assert!(!lock.force_release("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lock_runs_and_releases() {
        let lock = lock();
        let calls = AtomicU32::new(0);

        let result = lock
            .with_lock("job", Duration::from_secs(10), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(42)
            })
            .await
            .unwrap();

        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!lock.is_locked("job").await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lock_skips_when_held() {
        let lock = lock();
        let _held = lock.acquire("job", Duration::from_secs(10)).await.unwrap();
        let calls = AtomicU32::new(0);

        let result = lock
            .with_lock("job", Duration::from_secs(10), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(())
            })
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let lock = lock();

        let result = lock
            .with_lock("job", Duration::from_secs(10), || async {
                Err::<(), _>(CacheError::invalid_argument("boom"))
            })
            .await;

        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
        assert!(!lock.is_locked("job").await.unwrap());
    }

    async fn exploding_job() -> std::result::Result<(), CacheError> {
        panic!("job exploded")
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_panic() {
        let lock = lock();
        let task_lock = lock.clone();

        let joined = tokio::spawn(async move {
            task_lock
                .with_lock("job", Duration::from_secs(10), exploding_job)
                .await
        })
        .await;
        assert!(joined.is_err());

        // Release of an abandoned guard runs on a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lock.is_locked("job").await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_cancellation() {
        let lock = lock();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            lock.with_lock("job", Duration::from_secs(10), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, CacheError>(())
            }),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lock.is_locked("job").await.unwrap());
    }
}
