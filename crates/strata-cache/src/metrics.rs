//! Metric names and recording helpers.
//!
//! Only the `metrics` facade is used here; installing an exporter is left to the
//! embedding process.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_LOADER_CALLS_TOTAL: &str = "cache_loader_calls_total";
    pub const CACHE_LOCK_CONTENTION_TOTAL: &str = "cache_lock_contention_total";
    pub const CACHE_REFRESH_TOTAL: &str = "cache_refresh_total";
    pub const CACHE_WRITE_BEHIND_FLUSHED_TOTAL: &str = "cache_write_behind_flushed_total";
}

/// Record a cache hit.
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Set the number of cache entries.
pub fn set_cache_entries(tier: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier).set(count as f64);
}

/// Record an origin loader invocation made by a read path.
pub fn record_loader_call(path: &'static str) {
    counter!(names::CACHE_LOADER_CALLS_TOTAL, "path" => path).increment(1);
}

pub fn record_lock_contention() {
    counter!(names::CACHE_LOCK_CONTENTION_TOTAL).increment(1);
}

/// Record the outcome of a background refresh (`ok` / `error`).
pub fn record_refresh(outcome: &'static str) {
    counter!(names::CACHE_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

/// Record the outcome of a write-behind flush of one key (`ok` / `error`).
pub fn record_write_behind_flush(outcome: &'static str) {
    counter!(names::CACHE_WRITE_BEHIND_FLUSHED_TOTAL, "outcome" => outcome).increment(1);
}
