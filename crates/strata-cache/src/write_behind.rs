//! Write-behind buffering.
//!
//! Writes are accepted into an in-memory map and flushed to a sink on a fixed
//! interval. Repeated writes to a key between flushes coalesce to the last value.
//! Pending writes live only in process memory: a crash loses them.
//!
//! ```text
//! write(k, v) ──▶ pending map ──(every interval: swap)──▶ sink.write(k, v) per key
//!                                         │
//!                                 shutdown: final drain
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics;

/// Destination of flushed writes.
///
/// Implemented for async closures `Fn(String, V) -> Future<Output = anyhow::Result<()>>`.
#[async_trait]
pub trait WriteSink<V>: Send + Sync + 'static {
    async fn write(&self, key: &str, value: V) -> anyhow::Result<()>;
}

#[async_trait]
impl<V, F, Fut> WriteSink<V> for F
where
    V: Send + 'static,
    F: Fn(String, V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn write(&self, key: &str, value: V) -> anyhow::Result<()> {
        (self)(key.to_string(), value).await
    }
}

type Pending<V> = Arc<Mutex<HashMap<String, V>>>;

/// Handle to a running write-behind buffer. Cheap to clone.
pub struct WriteBehindBuffer<V> {
    pending: Pending<V>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<V> Clone for WriteBehindBuffer<V> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            shutdown: self.shutdown.clone(),
            task: Arc::clone(&self.task),
        }
    }
}

impl<V> WriteBehindBuffer<V>
where
    V: Send + 'static,
{
    /// Start the flush loop.
    ///
    /// The loop stops, after a final drain, when `parent` is cancelled or
    /// [`shutdown`](Self::shutdown) is called.
    pub fn spawn<S>(sink: S, flush_interval: Duration, parent: &CancellationToken) -> Self
    where
        S: WriteSink<V>,
    {
        let shutdown = parent.child_token();
        let pending: Pending<V> = Arc::new(Mutex::new(HashMap::new()));
        let task = tokio::spawn(flush_loop(
            Arc::clone(&pending),
            sink,
            flush_interval,
            shutdown.clone(),
        ));

        Self {
            pending,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Record a write; replaces any pending value for the same key.
    ///
    /// Returns `false`, dropping the value, once the buffer has shut down and no
    /// flush will ever pick it up.
    pub fn write(&self, key: impl Into<String>, value: V) -> bool {
        let mut pending = self.pending.lock();
        // Checked under the lock: the final drain takes the map after cancellation.
        if self.shutdown.is_cancelled() {
            let key = key.into();
            drop(pending);
            tracing::warn!(key = %key, "write-behind buffer is shut down, dropping write");
            return false;
        }
        pending.insert(key.into(), value);
        true
    }

    /// Number of keys waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stop the flush loop and wait for the final drain to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "write-behind flush task panicked");
            }
        }
    }
}

async fn flush_loop<V, S>(
    pending: Pending<V>,
    sink: S,
    every: Duration,
    shutdown: CancellationToken,
) where
    V: Send + 'static,
    S: WriteSink<V>,
{
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    tracing::debug!(interval_ms = every.as_millis() as u64, "write-behind flusher started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let flushed = flush(&pending, &sink).await;
                tracing::info!(flushed, "write-behind buffer drained on shutdown");
                break;
            }
            _ = ticker.tick() => {
                flush(&pending, &sink).await;
            }
        }
    }
}

/// Swap out the pending map and hand every entry to the sink.
///
/// Failed writes are logged and dropped. Writes arriving during the flush land in the
/// fresh map and go out with the next one.
async fn flush<V, S>(pending: &Mutex<HashMap<String, V>>, sink: &S) -> usize
where
    V: Send + 'static,
    S: WriteSink<V>,
{
    let batch = std::mem::take(&mut *pending.lock());
    if batch.is_empty() {
        return 0;
    }

    let total = batch.len();
    let mut failed = 0;
    for (key, value) in batch {
        match sink.write(&key, value).await {
            Ok(()) => metrics::record_write_behind_flush("ok"),
            Err(e) => {
                failed += 1;
                metrics::record_write_behind_flush("error");
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "write-behind flush failed, dropping write"
                );
            }
        }
    }

    tracing::debug!(total, failed, "write-behind flush complete");
    total - failed
}
