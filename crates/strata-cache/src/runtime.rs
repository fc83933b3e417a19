//! Process-wide cache wiring.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::aside::CacheAside;
use crate::config::StrataConfig;
use crate::error::Result;
use crate::layered::LayeredReader;
use crate::local::LocalStore;
use crate::lock::DistributedLock;
use crate::refresh::EarlyRefresher;
use crate::remote::{RemoteStore, connect_remote_store};
use crate::stampede::StampedeGuard;
use crate::stats::{CacheStats, HitCounters};
use crate::write_behind::{WriteBehindBuffer, WriteSink};

/// Built once at startup and shared; every cache component is handed out from here
/// so they agree on the shared store, the hit/miss counters and shutdown.
pub struct CacheRuntime {
    config: StrataConfig,
    remote: Arc<dyn RemoteStore>,
    counters: Arc<HitCounters>,
    shutdown: CancellationToken,
}

impl CacheRuntime {
    /// Validate `config` and connect the shared store (degrading to the in-process
    /// store when Redis is disabled or unreachable).
    pub async fn connect(config: StrataConfig) -> Result<Self> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let remote = connect_remote_store(&config.redis, &shutdown).await;
        Ok(Self::assemble(config, remote, shutdown))
    }

    /// Use an already constructed shared store.
    pub fn with_remote(config: StrataConfig, remote: Arc<dyn RemoteStore>) -> Self {
        Self::assemble(config, remote, CancellationToken::new())
    }

    fn assemble(
        config: StrataConfig,
        remote: Arc<dyn RemoteStore>,
        shutdown: CancellationToken,
    ) -> Self {
        tracing::info!(
            backend = remote.name(),
            lock_ttl_ms = config.stampede.lock_ttl_ms,
            flush_interval_ms = config.write_behind.flush_interval_ms,
            "cache runtime ready"
        );
        Self {
            config,
            remote,
            counters: Arc::new(HitCounters::new()),
            shutdown,
        }
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.remote)
    }

    pub fn lock(&self) -> DistributedLock {
        DistributedLock::new(self.remote())
    }

    pub fn cache_aside(&self) -> CacheAside {
        CacheAside::new(self.remote())
    }

    pub fn single_flight(&self) -> StampedeGuard {
        StampedeGuard::new(self.remote(), &self.config.stampede)
    }

    pub fn early_refresh(&self) -> EarlyRefresher {
        EarlyRefresher::new(self.remote())
    }

    /// A new local store reporting into the runtime's counters, swept in the
    /// background until shutdown.
    pub fn local_store<T>(&self) -> Arc<LocalStore<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let store = Arc::new(LocalStore::with_counters(
            self.config.local.default_ttl(),
            Arc::clone(&self.counters),
        ));
        store.spawn_sweeper(self.config.local.sweep_interval(), self.shutdown.child_token());
        store
    }

    pub fn layered<T>(&self, local: Arc<LocalStore<T>>) -> LayeredReader<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        LayeredReader::new(local, self.remote())
    }

    /// Start a write-behind buffer flushing to `sink`. It drains on
    /// [`shutdown`](Self::shutdown) and rejects writes afterwards.
    pub fn write_behind<V, S>(&self, sink: S) -> WriteBehindBuffer<V>
    where
        V: Send + 'static,
        S: WriteSink<V>,
    {
        WriteBehindBuffer::spawn(
            sink,
            self.config.write_behind.flush_interval(),
            &self.shutdown,
        )
    }

    /// Hit/miss totals of every local store created by this runtime.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Stop background tasks. Write-behind buffers perform a final flush.
    pub fn shutdown(&self) {
        tracing::info!("cache runtime shutting down");
        self.shutdown.cancel();
    }
}
