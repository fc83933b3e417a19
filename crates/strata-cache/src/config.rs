use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Top-level cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Shared L2 tier
    #[serde(default)]
    pub redis: RedisConfig,
    /// Process-local L1 tier
    #[serde(default)]
    pub local: LocalConfig,
    /// Single-flight loading
    #[serde(default)]
    pub stampede: StampedeConfig,
    /// Deferred writes
    #[serde(default)]
    pub write_behind: WriteBehindConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StrataConfig {
    pub fn validate(&self) -> Result<()> {
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err(CacheError::config("redis.url must not be empty"));
        }
        if self.redis.pool_size == 0 {
            return Err(CacheError::config("redis.pool_size must be > 0"));
        }
        if self.redis.timeout_ms == 0 || self.redis.command_timeout_ms == 0 {
            return Err(CacheError::config("redis timeouts must be > 0"));
        }
        if self.redis.reap_interval_secs == 0 {
            return Err(CacheError::config("redis.reap_interval_secs must be > 0"));
        }
        if self.local.default_ttl_secs == 0 {
            return Err(CacheError::config("local.default_ttl_secs must be > 0"));
        }
        if self.local.sweep_interval_secs == 0 {
            return Err(CacheError::config("local.sweep_interval_secs must be > 0"));
        }
        if self.stampede.lock_ttl_ms == 0 || self.stampede.retry_backoff_ms == 0 {
            return Err(CacheError::config(
                "stampede.lock_ttl_ms and stampede.retry_backoff_ms must be > 0",
            ));
        }
        if self.write_behind.flush_interval_ms == 0 {
            return Err(CacheError::config("write_behind.flush_interval_ms must be > 0"));
        }
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(CacheError::config(format!(
                "logging.level must be one of {LOG_LEVELS:?}"
            )));
        }
        Ok(())
    }
}

/// Redis (L2) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis; without it the shared tier degrades to an in-process store
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Per-command read/write timeout in milliseconds
    #[serde(default = "default_redis_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Pooled connections unused for longer than this are closed
    #[serde(default = "default_redis_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often idle connections are reclaimed
    #[serde(default = "default_redis_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_command_timeout_ms() -> u64 {
    3000
}

fn default_redis_idle_timeout_secs() -> u64 {
    300
}

fn default_redis_reap_interval_secs() -> u64 {
    30
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            command_timeout_ms: default_redis_command_timeout_ms(),
            idle_timeout_secs: default_redis_idle_timeout_secs(),
            reap_interval_secs: default_redis_reap_interval_secs(),
        }
    }
}

impl RedisConfig {
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// Local (L1) cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// TTL applied when a value is stored with a zero TTL
    #[serde(default = "default_local_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Interval of the background expired-entry sweep
    #[serde(default = "default_local_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_local_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_local_sweep_interval_secs() -> u64 {
    600 // 10 minutes
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_local_ttl_secs(),
            sweep_interval_secs: default_local_sweep_interval_secs(),
        }
    }
}

impl LocalConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Single-flight (stampede guard) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampedeConfig {
    /// TTL of the repopulation lock; should exceed the slowest loader
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Sleep between attempts while another instance holds the lock
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Attempts before giving up with `LockContention`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_lock_ttl_ms() -> u64 {
    10_000
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    100
}

impl Default for StampedeConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: default_lock_ttl_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl StampedeConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Write-behind buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBehindConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_flush_interval_ms() -> u64 {
    5000
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl WriteBehindConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::StrataConfig;
    use crate::error::{CacheError, Result};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Load configuration from an optional TOML file plus `STRATA__*` environment
    /// overrides, e.g. `STRATA__REDIS__URL=redis://cache:6379`.
    pub fn load_config(path: Option<&str>) -> Result<StrataConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(CacheError::config(format!("config file not found: {p}")));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from("strata.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::config(format!("config build error: {e}")))?;
        let merged: StrataConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::config(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = StrataConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.redis.enabled);
        assert_eq!(cfg.stampede.lock_ttl(), Duration::from_secs(10));
        assert_eq!(cfg.stampede.retry_backoff(), Duration::from_millis(100));
        assert_eq!(cfg.write_behind.flush_interval(), Duration::from_secs(5));
        assert_eq!(cfg.local.default_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut cfg = StrataConfig::default();
        cfg.redis.pool_size = 0;
        assert!(matches!(cfg.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_flush_interval() {
        let mut cfg = StrataConfig::default();
        cfg.write_behind.flush_interval_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut cfg = StrataConfig::default();
        cfg.logging.level = "WARN".to_string();
        assert!(cfg.validate().is_ok());

        cfg.logging.level = "verbose".to_string();
        assert!(matches!(cfg.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_load_from_file_fills_missing_fields() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp file");
        writeln!(
            file,
            "[redis]\nurl = \"redis://cache:6380\"\npool_size = 4\n\n[stampede]\nmax_retries = 7"
        )
        .expect("write config");

        let path = file.path().to_string_lossy().to_string();
        let cfg = loader::load_config(Some(&path)).expect("load config");

        assert_eq!(cfg.redis.url, "redis://cache:6380");
        assert_eq!(cfg.redis.pool_size, 4);
        assert_eq!(cfg.redis.timeout_ms, 5000);
        assert_eq!(cfg.stampede.max_retries, 7);
        assert_eq!(cfg.stampede.lock_ttl_ms, 10_000);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let err = loader::load_config(Some("/definitely/not/here/strata.toml")).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
