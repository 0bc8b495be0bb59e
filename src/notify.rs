//! Removal-notification dispatch.
//!
//! Design Notes §9 flags the source's actor-style broadcast for the
//! simulator and listener dispatcher for replacement: "replace with
//! explicit task channels. A policy is a receiver that consumes batched
//! event vectors; the dispatcher owns a per-listener single-consumer queue
//! whose tail is advanced by the executor, preserving per-key order
//! without locks." This is exactly that, narrowed to the one listener a
//! `Cache` can carry: notifications are pushed in the order their causal
//! operations commit (single-key linearizability from `EntryStore` makes
//! that order well-defined per §5), and a single drain task -- scheduled
//! at most once at a time -- pops them in FIFO order and invokes the
//! listener.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;

use crate::stats::RemovalCause;

pub(crate) struct RemovalDispatcher<K, V> {
    queue: SegQueue<(K, V, RemovalCause)>,
    scheduled: AtomicBool,
}

impl<K, V> RemovalDispatcher<K, V> {
    pub fn new() -> Self {
        RemovalDispatcher { queue: SegQueue::new(), scheduled: AtomicBool::new(false) }
    }

    pub fn push(&self, key: K, value: V, cause: RemovalCause) {
        self.queue.push((key, value, cause));
    }

    /// Claims the right to run the drain loop; returns `false` if another
    /// thread already holds it, in which case that thread will observe
    /// this push (or a later one) before it finishes draining.
    pub fn claim_drain(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    pub fn release_drain(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    pub fn pop(&self) -> Option<(K, V, RemovalCause)> {
        self.queue.pop()
    }

    /// Used by the drain loop's release/recheck dance (see
    /// `Cache::drain_notifications`) to detect a push that raced in
    /// between the loop's last `pop` and its `release_drain`.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_drain_is_exclusive_until_released() {
        let dispatcher: RemovalDispatcher<&'static str, u32> = RemovalDispatcher::new();
        assert!(dispatcher.claim_drain());
        assert!(!dispatcher.claim_drain());
        dispatcher.release_drain();
        assert!(dispatcher.claim_drain());
    }

    #[test]
    fn is_empty_reflects_pending_items() {
        let dispatcher: RemovalDispatcher<&'static str, u32> = RemovalDispatcher::new();
        assert!(dispatcher.is_empty());
        dispatcher.push("a", 1, RemovalCause::Explicit);
        assert!(!dispatcher.is_empty());
        dispatcher.pop();
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn push_and_pop_preserve_fifo_order() {
        let dispatcher: RemovalDispatcher<&'static str, u32> = RemovalDispatcher::new();
        dispatcher.push("a", 1, RemovalCause::Explicit);
        dispatcher.push("b", 2, RemovalCause::Size);
        assert_eq!(dispatcher.pop(), Some(("a", 1, RemovalCause::Explicit)));
        assert_eq!(dispatcher.pop(), Some(("b", 2, RemovalCause::Size)));
        assert_eq!(dispatcher.pop(), None);
    }
}
