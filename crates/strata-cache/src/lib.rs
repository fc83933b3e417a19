//! Multi-tier cache coordination for horizontally scaled services.
//!
//! ## Architecture
//!
//! - **L1 (DashMap)**: in-process, per-instance, sub-microsecond
//! - **L2 (Redis)**: shared by every instance, milliseconds
//! - **Origin**: whatever the caller's loader talks to
//!
//! ```text
//! read  → L1 → L2 → loader        (LayeredReader)
//!              L2 → loader        (CacheAside / StampedeGuard / EarlyRefresher)
//! write → pending map ─interval─▶ sink   (WriteBehindBuffer)
//! ```
//!
//! ## Graceful Degradation
//!
//! If Redis is disabled or unreachable at startup, [`connect_remote_store`] returns an
//! in-process store; caching and locking then only coordinate within one instance.

pub mod aside;
pub mod config;
pub mod error;
pub mod layered;
pub mod local;
pub mod lock;
pub mod metrics;
pub mod refresh;
pub mod remote;
pub mod runtime;
pub mod stampede;
pub mod stats;
pub mod write_behind;

pub use aside::CacheAside;
pub use config::{
    LocalConfig, LoggingConfig, RedisConfig, StampedeConfig, StrataConfig, WriteBehindConfig,
};
pub use error::{CacheError, Result};
pub use layered::LayeredReader;
pub use local::{LocalStore, Namespaced};
pub use lock::{DistributedLock, LockGuard};
pub use refresh::{EarlyRefresher, RefreshableEntry};
pub use remote::{
    MemoryRemoteStore, RedisStore, RemoteStore, connect_remote_store, get_json, set_json,
};
pub use runtime::CacheRuntime;
pub use stampede::StampedeGuard;
pub use stats::{CacheStats, HitCounters};
pub use write_behind::{WriteBehindBuffer, WriteSink};
