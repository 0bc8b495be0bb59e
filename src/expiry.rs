//! Expiration bookkeeping: timer wheels keyed by deadline (§4.7) and the
//! in-flight tracker that enforces "at most one refresh per key" for
//! refresh-after-write.
//!
//! The wheel is a single-level bucketed structure rather than Caffeine's
//! hierarchical wheel: §9 leaves scheduling precision to the implementer
//! ("sub-millisecond scheduled expiration precision" is an explicit
//! Non-goal), so one `BTreeMap` level keeps the coordinator's drain step
//! simple without sacrificing correctness -- only latency of eviction
//! after the deadline, which the spec does not bound tightly.

use std::collections::BTreeMap;
use std::hash::Hash;

use dashmap::DashSet;

use crate::slab::EntryId;

/// Deadlines are bucketed to this granularity (in nanoseconds) to bound
/// the number of distinct wheel buckets under high insert/expire churn.
const BUCKET_WIDTH_NANOS: u64 = 1_000_000; // 1ms

fn bucket_of(deadline_nanos: u64) -> u64 {
    deadline_nanos / BUCKET_WIDTH_NANOS
}

/// Keyed by deadline, a single-level timer wheel recording which entries
/// must be reconsidered once "now" passes their bucket.
pub(crate) struct ExpirationWheel {
    buckets: BTreeMap<u64, Vec<EntryId>>,
}

impl ExpirationWheel {
    pub fn new() -> Self {
        ExpirationWheel { buckets: BTreeMap::new() }
    }

    pub fn schedule(&mut self, entry_id: EntryId, deadline_nanos: u64) {
        self.buckets.entry(bucket_of(deadline_nanos)).or_default().push(entry_id);
    }

    /// Removes every occurrence of `entry_id` from the wheel. Used when an
    /// entry's deadline is rescheduled or it is removed outright; O(bucket
    /// size) but buckets stay small under the 1ms granularity above.
    pub fn cancel(&mut self, entry_id: EntryId) {
        self.buckets.retain(|_, ids| {
            ids.retain(|id| *id != entry_id);
            !ids.is_empty()
        });
    }

    /// Drains every bucket whose deadline has passed `now`, returning the
    /// ids that must be checked for actual expiry (a bucket firing does
    /// not itself guarantee staleness if the entry's deadline was bumped
    /// without cancelling the earlier wheel entry).
    pub fn advance_to(&mut self, now_nanos: u64) -> Vec<EntryId> {
        let now_bucket = bucket_of(now_nanos);
        let remaining = self.buckets.split_off(&(now_bucket + 1));
        let due = std::mem::replace(&mut self.buckets, remaining);
        due.into_values().flatten().collect()
    }
}

/// Tracks keys with an in-flight refresh-after-write reload so concurrent
/// readers past the refresh deadline coalesce onto a single reload.
pub(crate) struct RefreshTracker<K> {
    in_flight: DashSet<K>,
}

impl<K> RefreshTracker<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        RefreshTracker { in_flight: DashSet::new() }
    }

    /// Attempts to claim the refresh for `key`; returns `true` if this
    /// caller is now responsible for kicking off the reload, `false` if
    /// another caller already owns it.
    pub fn try_claim(&self, key: &K) -> bool {
        self.in_flight.insert(key.clone())
    }

    pub fn release(&self, key: &K) {
        self.in_flight.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_id(n: u32) -> EntryId {
        let mut slab: crate::slab::Slab<u32> = crate::slab::Slab::new();
        let mut last = slab.insert(0);
        for _ in 0..n {
            last = slab.insert(0);
        }
        last
    }

    #[test]
    fn advance_to_returns_only_due_buckets() {
        let mut wheel = ExpirationWheel::new();
        let soon = fresh_id(0);
        let later = fresh_id(1);
        wheel.schedule(soon, 5 * BUCKET_WIDTH_NANOS);
        wheel.schedule(later, 50 * BUCKET_WIDTH_NANOS);

        let due = wheel.advance_to(10 * BUCKET_WIDTH_NANOS);
        assert_eq!(due, vec![soon]);

        let due = wheel.advance_to(60 * BUCKET_WIDTH_NANOS);
        assert_eq!(due, vec![later]);
    }

    #[test]
    fn cancel_removes_entry_from_its_bucket() {
        let mut wheel = ExpirationWheel::new();
        let id = fresh_id(0);
        wheel.schedule(id, 5 * BUCKET_WIDTH_NANOS);
        wheel.cancel(id);
        assert!(wheel.advance_to(100 * BUCKET_WIDTH_NANOS).is_empty());
    }

    #[test]
    fn refresh_tracker_allows_only_one_claim_per_key() {
        let tracker: RefreshTracker<&'static str> = RefreshTracker::new();
        assert!(tracker.try_claim(&"k"));
        assert!(!tracker.try_claim(&"k"));
        tracker.release(&"k");
        assert!(tracker.try_claim(&"k"));
    }
}
