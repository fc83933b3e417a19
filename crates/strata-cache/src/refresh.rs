//! Early refresh of hot keys.
//!
//! Entries carry two watermarks. Past `refresh_at` the cached value is still served,
//! and a background task reloads it so that readers rarely observe a miss. Past
//! `expires_at` the entry is treated as absent.
//!
//! ```text
//! written          refresh_at               expires_at
//!    │─── fresh ───────│──── stale, refreshing ───│──── miss
//!    ◀────────── ttl - refresh_before ───────────▶
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::metrics;
use crate::remote::{RemoteStore, get_json, set_json, write_back};

/// Stored form of a value managed by [`EarlyRefresher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshableEntry<T> {
    pub data: T,
    pub expires_at: DateTime<Utc>,
    pub refresh_at: DateTime<Utc>,
}

impl<T> RefreshableEntry<T> {
    /// Wrap `data` written at `now`.
    pub fn new(
        data: T,
        now: DateTime<Utc>,
        ttl: Duration,
        refresh_before: Duration,
    ) -> Result<Self> {
        let out_of_range = || CacheError::invalid_argument("ttl overflows the clock");
        let expires_at = now
            .checked_add_signed(to_delta(ttl)?)
            .ok_or_else(out_of_range)?;
        let refresh_at = expires_at
            .checked_sub_signed(to_delta(refresh_before)?)
            .ok_or_else(out_of_range)?;

        Ok(Self {
            data,
            expires_at,
            refresh_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now > self.refresh_at
    }
}

fn to_delta(duration: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(duration)
        .map_err(|_| CacheError::invalid_argument(format!("duration out of range: {duration:?}")))
}

fn validate_windows(ttl: Duration, refresh_before: Duration) -> Result<()> {
    if refresh_before.is_zero() || refresh_before >= ttl {
        return Err(CacheError::invalid_argument(format!(
            "refresh_before ({refresh_before:?}) must be > 0 and < ttl ({ttl:?})"
        )));
    }
    RefreshableEntry::new((), Utc::now(), ttl, refresh_before).map(|_| ())
}

#[derive(Clone)]
pub struct EarlyRefresher {
    store: Arc<dyn RemoteStore>,
}

impl EarlyRefresher {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Return the cached value for `key`, refreshing it in the background once it
    /// enters its final `refresh_before` window.
    ///
    /// On a miss (or an expired entry) `loader` runs inline. In the refresh window the
    /// current value is returned immediately and `loader` runs on a spawned task; its
    /// failure is logged and the old value keeps being served until it expires.
    /// Each reader in the window may start its own refresh.
    pub async fn load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        refresh_before: Duration,
        loader: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<CacheError> + Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        validate_windows(ttl, refresh_before)?;

        let now = Utc::now();
        if let Some(entry) = get_json::<RefreshableEntry<T>>(self.store.as_ref(), key).await? {
            if !entry.is_expired(now) {
                metrics::record_cache_hit("l2");
                if entry.needs_refresh(now) {
                    tracing::debug!(
                        key = %key,
                        refresh_at = %entry.refresh_at,
                        "entry in refresh window"
                    );
                    self.spawn_refresh(key.to_string(), ttl, refresh_before, loader);
                }
                return Ok(entry.data);
            }
            tracing::debug!(key = %key, expires_at = %entry.expires_at, "entry expired");
        }

        metrics::record_cache_miss();
        metrics::record_loader_call("early_refresh");

        let data = loader().await?;
        let entry = RefreshableEntry::new(data, Utc::now(), ttl, refresh_before)?;
        write_back(self.store.as_ref(), key, &entry, ttl).await;
        Ok(entry.data)
    }

    fn spawn_refresh<T, E, F, Fut>(
        &self,
        key: String,
        ttl: Duration,
        refresh_before: Duration,
        loader: F,
    ) where
        T: Serialize + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let data = match loader().await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "background refresh failed, serving stale value"
                    );
                    metrics::record_refresh("error");
                    return;
                }
            };

            let stored = match RefreshableEntry::new(data, Utc::now(), ttl, refresh_before) {
                Ok(entry) => set_json(store.as_ref(), &key, &entry, ttl).await,
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => {
                    tracing::debug!(key = %key, "background refresh stored");
                    metrics::record_refresh("ok");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to store refreshed value");
                    metrics::record_refresh("error");
                }
            }
        });
    }
}
