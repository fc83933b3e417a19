//! Redis-backed shared store.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::RemoteStore;
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const SCAN_BATCH: usize = 100;

/// Redis rejects expiries whose absolute time overflows a signed 64-bit millisecond clock.
const MAX_TTL_MILLIS: u64 = (i64::MAX / 2) as u64;

/// Shared store backed by a bounded deadpool of Redis connections.
///
/// ## Resource Limits
///
/// | Limit              | Source                     |
/// |--------------------|----------------------------|
/// | Open connections   | `pool_size`                |
/// | Pool wait/connect  | `timeout_ms`               |
/// | Single command     | `command_timeout_ms`       |
/// | Idle connection    | `idle_timeout_secs` (reaper) |
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    command_timeout: Duration,
    idle_timeout: Duration,
}

impl RedisStore {
    /// Build the connection pool. No connection is opened until first use.
    pub fn connect(config: &RedisConfig) -> Result<Self> {
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.pool_timeout());
        pool_config.timeouts.create = Some(config.pool_timeout());
        pool_config.timeouts.recycle = Some(config.pool_timeout());

        let mut redis_config = Config::from_url(&config.url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::PoolSetup(e.to_string()))?;

        Ok(Self::from_pool(
            pool,
            config.command_timeout(),
            config.idle_timeout(),
        ))
    }

    pub fn from_pool(pool: Pool, command_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            pool,
            command_timeout,
            idle_timeout,
        }
    }

    /// Periodically close pooled connections that sat idle longer than the idle timeout.
    pub fn spawn_idle_reaper(
        &self,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let max_idle = self.idle_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = pool.retain(|_, metrics| metrics.last_used() < max_idle);
                        let status = pool.status();
                        tracing::debug!(
                            size = status.size,
                            max_size = status.max_size,
                            "reaped idle Redis connections"
                        );
                    }
                }
            }
        })
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout {
                operation,
                after: self.command_timeout,
            })?
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_TTL_MILLIS)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.bounded("GET", async {
            let mut conn = self.conn().await?;
            let value: Option<Vec<u8>> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.bounded("SET", async {
            let mut conn = self.conn().await?;
            conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl)).await?;
            Ok(())
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.bounded("SET NX", async {
            let mut conn = self.conn().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded("DEL", async {
            let mut conn = self.conn().await?;
            let removed: i64 = conn.del(key).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.bounded("compare-and-delete", async {
            let mut conn = self.conn().await?;
            let script = redis::Script::new(COMPARE_AND_DELETE_SCRIPT);
            let removed: i64 = script
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.bounded("EXISTS", async {
            let mut conn = self.conn().await?;
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        // Each SCAN page gets its own deadline; the whole sweep may take longer.
        let mut cursor: u64 = 0;
        let mut total_deleted: u64 = 0;

        loop {
            let (next, deleted) = self
                .bounded("SCAN/DEL", async {
                    let mut conn = self.conn().await?;
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;

                    let deleted: i64 = if keys.is_empty() {
                        0
                    } else {
                        conn.del(&keys).await?
                    };
                    Ok((next, deleted))
                })
                .await?;

            total_deleted += deleted.max(0) as u64;
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(pattern = %pattern, deleted = total_deleted, "deleted keys by pattern");
        Ok(total_deleted)
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.bounded("HSET", async {
            let mut conn = self.conn().await?;
            conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
            Ok(())
        })
        .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.bounded("HGETALL", async {
            let mut conn = self.conn().await?;
            let fields: HashMap<String, String> = conn.hgetall(key).await?;
            Ok(fields)
        })
        .await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.bounded("HGET", async {
            let mut conn = self.conn().await?;
            let value: Option<String> = conn.hget(key, field).await?;
            Ok(value)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.bounded("PING", async {
            let mut conn = self.conn().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
