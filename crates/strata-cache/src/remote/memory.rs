//! In-process implementation of the shared store contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::RemoteStore;
use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct StoredValue {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl StoredValue {
    /// A TTL too large to represent as an `Instant` never expires.
    fn bytes(value: &[u8], now: Instant, ttl: Duration) -> Self {
        Self {
            slot: Slot::Bytes(value.to_vec()),
            expires_at: now.checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Shared-store stand-in that lives inside one process.
///
/// Mirrors Redis semantics closely enough for the coordination primitives:
/// millisecond TTLs, atomic create-if-absent and compare-and-delete, glob
/// deletion, hashes, and WRONGTYPE errors when mixing strings and hashes.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, value| !value.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawn the periodic expired-key sweep. It stops when `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "purged expired in-process shared store keys");
                        }
                    }
                }
            }
        })
    }

    /// Run `read` against the live entry for `key`. An expired entry is evicted and
    /// reported as absent.
    fn read_live<R>(&self, key: &str, read: impl FnOnce(&Slot) -> Result<R>) -> Result<Option<R>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(value) if !value.is_expired(now) => return read(&value.slot).map(Some),
            Some(_) => {}
            None => return Ok(None),
        }

        self.evict_if_expired(key, now);
        Ok(None)
    }

    /// Drop the entry for `key` if it has expired.
    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, value| value.is_expired(now));
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::WrongType {
        key: key.to_string(),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read_live(key, |slot| match slot {
            Slot::Bytes(bytes) => Ok(bytes.clone()),
            Slot::Hash(_) => Err(wrong_type(key)),
        })
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredValue::bytes(value, Instant::now(), ttl),
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let fresh = StoredValue::bytes(value, now, ttl);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, value)| !value.is_expired(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let now = Instant::now();
        let removed = self.entries.remove_if(key, |_, value| {
            !value.is_expired(now) && matches!(&value.slot, Slot::Bytes(bytes) if bytes == expected)
        });
        Ok(removed.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|value| !value.is_expired(now)))
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let matcher =
            glob::Pattern::new(pattern).map_err(|e| CacheError::InvalidPattern(e.to_string()))?;
        let now = Instant::now();

        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| matcher.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut deleted = 0;
        for key in matching {
            if let Some((_, value)) = self.entries.remove(&key) {
                if !value.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        self.evict_if_expired(key, now);

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue {
                slot: Slot::Hash(HashMap::new()),
                expires_at: None,
            });

        match &mut entry.slot {
            Slot::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            Slot::Bytes(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.read_live(key, |slot| match slot {
            Slot::Hash(map) => Ok(map.clone()),
            Slot::Bytes(_) => Err(wrong_type(key)),
        })
        .map(Option::unwrap_or_default)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.read_live(key, |slot| match slot {
            Slot::Hash(map) => Ok(map.get(field).cloned()),
            Slot::Bytes(_) => Err(wrong_type(key)),
        })
        .map(Option::flatten)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
