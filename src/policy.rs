//! The `Policy` introspection surface named in spec §6 but left undetailed
//! there; SPEC_FULL's "Supplemented features" section pins down
//! `coldest`/`hottest` as a walk of the Probation-then-Window queues
//! (coldest) and the Protected queue tail-to-head (hottest) under a
//! momentary hold of the maintenance lock, returning owned pairs rather
//! than live references -- the lock is never handed out past this
//! function's return.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::cache::Cache;
use crate::queues::QueueId;

/// A read/administrative view over a `Cache`'s replacement-policy state.
/// Borrowed from the cache it was created from; does not outlive it.
pub struct Policy<'a, K, V> {
    pub(crate) cache: &'a Cache<K, V>,
}

impl<'a, K, V> Policy<'a, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// The configured maximum weight, or `u64::MAX` if the cache was built
    /// without a `maximumWeight` (unbounded).
    pub fn maximum(&self) -> u64 {
        self.cache.shared.max_weight.load(Ordering::Relaxed)
    }

    /// Changes the maximum weight and, if the new maximum is smaller,
    /// forces an immediate synchronous drain to evict down to it.
    pub fn set_maximum(&self, new_maximum: u64) {
        self.cache.set_maximum(new_maximum);
    }

    /// The `n` coldest entries (closest to eviction), ordered from
    /// coldest to warmest: Probation's head-to-tail, then Window's
    /// head-to-tail once Probation is exhausted.
    pub fn coldest(&self, n: usize) -> Vec<(K, Arc<V>)> {
        if n == 0 {
            return Vec::new();
        }
        let guard = self.cache.shared.maintenance.lock();
        let mut ids = guard.queues.iter_from_head(&guard.slab, QueueId::Probation);
        ids.extend(guard.queues.iter_from_head(&guard.slab, QueueId::Window));
        self.cache.resolve_snapshot(&guard, ids, n)
    }

    /// The `n` hottest entries (least likely to be evicted next),
    /// Protected's tail-to-head.
    pub fn hottest(&self, n: usize) -> Vec<(K, Arc<V>)> {
        if n == 0 {
            return Vec::new();
        }
        let guard = self.cache.shared.maintenance.lock();
        let ids = guard.queues.iter_from_tail(&guard.slab, QueueId::Protected);
        self.cache.resolve_snapshot(&guard, ids, n)
    }
}
