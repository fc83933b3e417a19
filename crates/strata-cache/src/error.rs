use std::time::Duration;

use thiserror::Error;

/// Errors raised by the cache tiers and coordination primitives.
///
/// A missing key is never an error: lookups report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis pool setup error: {0}")]
    PoolSetup(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation against a key holding the wrong kind of value: {key}")]
    WrongType { key: String },

    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Lock for {key} still held after {attempts} attempts")]
    LockContention { key: String, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for faults talking to the remote tier (network, pool, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Redis(_) | Self::Pool(_) | Self::PoolSetup(_) | Self::Timeout { .. }
        )
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
