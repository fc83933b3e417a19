//! Process-local hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared hit/miss counters.
///
/// One instance is created per process (by [`crate::CacheRuntime`]) and handed to
/// every local store that should contribute to the externally observed hit rate.
#[derive(Debug, Default)]
pub struct HitCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_calculation() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
        };
        assert!((stats.hit_rate() - 75.0).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_reset_clears_counters() {
        let counters = HitCounters::new();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(
            counters.snapshot(),
            CacheStats {
                hits: 2,
                misses: 1
            }
        );

        counters.reset();
        assert_eq!(counters.snapshot(), CacheStats::default());
    }
}
