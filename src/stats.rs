//! Removal causes and the atomics-backed statistics counters, grounded on
//! the teacher's `cache::cache_statistics::{EvictionReason, CacheMetrics}`
//! shape (a reason enum paired with a counters struct exposing derived
//! rates), adapted from `Mutex`-guarded plain integers to lock-free
//! atomics since these counters are touched on every hot-path operation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Why a key→value mapping ceased to exist.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum RemovalCause {
    /// Removed by an explicit `invalidate`/`invalidateAll` call.
    Explicit,
    /// Overwritten by a `put`/`replace` for the same key.
    Replaced,
    /// A weak/soft value was garbage-collected.
    Collected,
    /// An access- or write-expiry deadline passed.
    Expired,
    /// Evicted to keep total weight within `maximumWeight`.
    Size,
}

/// Monotonic, best-effort counters, per §6.
#[derive(Default)]
pub(crate) struct CacheStatisticsCounters {
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    load_success_count: AtomicU64,
    load_failure_count: AtomicU64,
    total_load_nanos: AtomicU64,
    eviction_count: AtomicU64,
    eviction_weight: AtomicU64,
}

impl CacheStatisticsCounters {
    pub fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_success(&self, nanos: u64) {
        self.load_success_count.fetch_add(1, Ordering::Relaxed);
        self.total_load_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self, nanos: u64) {
        self.load_failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_load_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, weight: u64) {
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        self.eviction_weight.fetch_add(weight, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatistics {
        CacheStatistics {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            load_success_count: self.load_success_count.load(Ordering::Relaxed),
            load_failure_count: self.load_failure_count.load(Ordering::Relaxed),
            total_load_nanos: self.total_load_nanos.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            eviction_weight: self.eviction_weight.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of the statistics counters, returned by
/// `Cache::stats()`.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub load_success_count: u64,
    pub load_failure_count: u64,
    pub total_load_nanos: u64,
    pub eviction_count: u64,
    pub eviction_weight: u64,
}

impl CacheStatistics {
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 { 1.0 } else { self.hit_count as f64 / total as f64 }
    }

    pub fn miss_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 { 0.0 } else { self.miss_count as f64 / total as f64 }
    }

    pub fn load_count(&self) -> u64 {
        self.load_success_count + self.load_failure_count
    }

    pub fn average_load_penalty_nanos(&self) -> f64 {
        let loads = self.load_count();
        if loads == 0 { 0.0 } else { self.total_load_nanos as f64 / loads as f64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_with_no_requests_is_one() {
        let counters = CacheStatisticsCounters::default();
        assert_eq!(counters.snapshot().hit_rate(), 1.0);
    }

    #[test]
    fn hit_and_miss_rates_sum_to_one() {
        let counters = CacheStatisticsCounters::default();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.hit_count, 2);
        assert_eq!(snapshot.miss_count, 1);
        assert!((snapshot.hit_rate() + snapshot.miss_rate() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn eviction_tracking_accumulates_weight() {
        let counters = CacheStatisticsCounters::default();
        counters.record_eviction(3);
        counters.record_eviction(2);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.eviction_count, 2);
        assert_eq!(snapshot.eviction_weight, 5);
    }
}
