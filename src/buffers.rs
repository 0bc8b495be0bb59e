//! The striped read buffer and the lossless write buffer, per spec §4.4
//! and §4.5.
//!
//! Grounded on the teacher's own guidance (`common/concurrent_map.rs`) to
//! prefer a real concurrency crate over hand-rolling one: both buffers sit
//! directly on `crossbeam::queue` primitives (already a teacher
//! dependency) rather than a bespoke CAS ring, matching the same
//! real-crate-over-hand-rolled precedent used for the Entry Store's
//! `DashMap`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam::queue::{ArrayQueue, SegQueue};

use crate::slab::EntryId;
use crate::stats::RemovalCause;

/// Capacity of each read-buffer stripe ring.
const STRIPE_CAPACITY: usize = 16;

/// Outcome of `ReadBuffer::offer`. The read buffer is a hint, not a
/// ledger: losses never affect correctness (§4.4), only hit-rate quality.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum OfferOutcome {
    Success,
    /// The selected stripe's ring was saturated; the read is dropped.
    /// Crossbeam's `ArrayQueue` resolves internal contention via CAS
    /// retries before returning, so there is no separate "contended,
    /// retry not required" outcome to surface here the way the spec's
    /// three-way result distinguishes it -- `Full` covers both cases.
    Full,
}

/// A striped, bounded, lossy multi-producer ring of recently-read entry
/// ids, drained single-consumer by the maintenance coordinator.
pub(crate) struct ReadBuffer {
    stripes: Vec<ArrayQueue<EntryId>>,
}

impl ReadBuffer {
    /// `stripe_count` is typically 4x the next power of two ≥ available
    /// hardware parallelism, per §4.4.
    pub fn new(stripe_count: usize) -> Self {
        let stripe_count = stripe_count.max(1).next_power_of_two();
        let stripes = (0..stripe_count).map(|_| ArrayQueue::new(STRIPE_CAPACITY)).collect();
        ReadBuffer { stripes }
    }

    pub fn with_default_striping() -> Self {
        let parallelism = num_cpus::get().max(1);
        Self::new(4 * parallelism.next_power_of_two())
    }

    fn stripe_index(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        (hasher.finish() as usize) & (self.stripes.len() - 1)
    }

    /// Selects a stripe from the calling thread's identity and performs a
    /// single push attempt; never blocks.
    pub fn offer(&self, entry_id: EntryId) -> OfferOutcome {
        let stripe = &self.stripes[self.stripe_index()];
        match stripe.push(entry_id) {
            Ok(()) => OfferOutcome::Success,
            Err(_full) => OfferOutcome::Full,
        }
    }

    /// Drains every stripe in order, invoking `visit` for each entry id up
    /// to `quantum` items per stripe.
    pub fn drain_into(&self, quantum: usize, mut visit: impl FnMut(EntryId)) {
        for stripe in &self.stripes {
            for _ in 0..quantum {
                match stripe.pop() {
                    Some(entry_id) => visit(entry_id),
                    None => break,
                }
            }
        }
    }
}

/// One unit of deferred structural (slab/queue) work, applied under the
/// maintenance lock during a drain cycle. The originating caller has
/// already committed the corresponding Entry Store change and, where
/// applicable, fired the removal notification itself (§4.6) -- these
/// tasks only reconcile the intrusive queues and the slab, so `Removal`
/// needs nothing beyond the id and a cause for logging.
pub(crate) enum WriteTask {
    Add { id: EntryId },
    Update { id: EntryId, new_weight: u32 },
    Removal { id: EntryId, cause: RemovalCause },
    ExpireReorder { id: EntryId, deadline_nanos: u64 },
}

/// A lossless MPSC queue of write tasks. Unbounded by construction
/// (`crossbeam::queue::SegQueue`), so "producers must never drop a write"
/// holds structurally; a soft watermark tells producers when to help by
/// draining inline instead of growing the queue further.
pub(crate) struct WriteBuffer {
    queue: SegQueue<WriteTask>,
    pending: AtomicUsize,
    watermark: usize,
}

impl WriteBuffer {
    pub fn new(watermark: usize) -> Self {
        WriteBuffer { queue: SegQueue::new(), pending: AtomicUsize::new(0), watermark }
    }

    pub fn push(&self, task: WriteTask) {
        self.queue.push(task);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop(&self) -> Option<WriteTask> {
        let task = self.queue.pop();
        if task.is_some() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
        task
    }

    pub fn is_empty(&self) -> bool {
        self.pending.load(Ordering::Relaxed) == 0
    }

    /// True once pending work crosses the soft high-watermark; callers
    /// should assist by draining inline rather than enqueueing further.
    pub fn should_assist_drain(&self) -> bool {
        self.pending.load(Ordering::Relaxed) > self.watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_buffer_offer_fills_then_reports_full() {
        let buffer = ReadBuffer::new(1);
        let mut slab: crate::slab::Slab<u32> = crate::slab::Slab::new();
        let ids: Vec<_> = (0..STRIPE_CAPACITY + 1).map(|i| slab.insert(i as u32)).collect();
        for id in &ids[..STRIPE_CAPACITY] {
            assert_eq!(buffer.offer(*id), OfferOutcome::Success);
        }
        assert_eq!(buffer.offer(ids[STRIPE_CAPACITY]), OfferOutcome::Full);
    }

    #[test]
    fn read_buffer_drain_visits_in_fifo_order() {
        let buffer = ReadBuffer::new(1);
        let mut slab: crate::slab::Slab<u32> = crate::slab::Slab::new();
        let a = slab.insert(1u32);
        let b = slab.insert(2u32);
        buffer.offer(a);
        buffer.offer(b);
        let mut seen = Vec::new();
        buffer.drain_into(10, |id| seen.push(id));
        assert_eq!(seen, vec![a, b]);
    }

    #[test]
    fn write_buffer_tracks_pending_and_watermark() {
        let buffer = WriteBuffer::new(2);
        let mut slab: crate::slab::Slab<u32> = crate::slab::Slab::new();
        let id = slab.insert(0u32);
        assert!(buffer.is_empty());
        buffer.push(WriteTask::Add { id });
        buffer.push(WriteTask::Add { id });
        assert!(!buffer.should_assist_drain());
        buffer.push(WriteTask::Add { id });
        assert!(buffer.should_assist_drain());
        assert!(buffer.pop().is_some());
        assert!(!buffer.is_empty());
    }
}
