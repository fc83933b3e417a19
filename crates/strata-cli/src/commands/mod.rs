pub mod hash;
pub mod keys;

use std::sync::Arc;

use anyhow::{Context, Result};
use strata_cache::{RedisConfig, RedisStore, RemoteStore};

/// Connect straight to Redis. There is no in-process fallback: commands must act on
/// the store the fleet shares.
pub async fn connect(config: &RedisConfig) -> Result<Arc<dyn RemoteStore>> {
    if !config.enabled {
        tracing::debug!("redis.enabled is false; connecting anyway for operator command");
    }

    let store = RedisStore::connect(config).context("creating Redis pool")?;
    store
        .ping()
        .await
        .with_context(|| format!("connecting to {}", config.url))?;

    Ok(Arc::new(store))
}
