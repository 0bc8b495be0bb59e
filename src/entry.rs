//! The per-key data types: `Handle` (the value-bearing object addressed
//! directly by the Entry Store) and `Link` (the structural record that
//! lives in the coordinator's slab and threads the intrusive queues).
//!
//! Splitting "value" from "structural position" is the one deliberate
//! departure from a single unified `Entry` struct (see DESIGN.md): it is
//! what lets `getIfPresent`/value-preserving `put` stay lock-free on the
//! hot path (a per-handle `parking_lot::RwLock` guards only the value,
//! the same granularity the teacher's `cache::query_cache::QueryCache`
//! uses for its whole table, just narrowed to one entry) while queue
//! membership stays serialized behind the single maintenance lock per
//! Design Notes §9.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::Shared;
use parking_lot::RwLock;

pub use crate::slab::EntryId;

/// Which of the three LRU regions (or neither) an entry currently belongs
/// to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueueTag {
    Window,
    Probation,
    Protected,
    /// Unlinked: not yet admitted into a queue, or evicted/removed and
    /// pending final cleanup.
    Dead,
}

pub(crate) type LoadFuture<V> = Shared<Pin<Box<dyn Future<Output = Result<Arc<V>, String>> + Send>>>;

/// How strongly the cache holds a value, per Design Notes §9.
///
/// `Weak`/`Soft` both downgrade to `std::sync::Weak`: Rust has no distinct
/// soft-reference tier, so `Soft` is carried as an alias of `Weak` and
/// documented as an approximation (DESIGN.md) rather than invented
/// GC-pressure-aware behavior the standard library cannot express.
pub(crate) enum ValueHolder<V> {
    Strong(Arc<V>),
    Weak(Weak<V>),
    Soft(Weak<V>),
    Pending(LoadFuture<V>),
}

impl<V> ValueHolder<V> {
    /// Returns the currently visible strong value, or `None` if collected
    /// or still pending. Never blocks on a pending load.
    pub(crate) fn peek(&self) -> Option<Arc<V>> {
        match self {
            ValueHolder::Strong(v) => Some(v.clone()),
            ValueHolder::Weak(w) | ValueHolder::Soft(w) => w.upgrade(),
            ValueHolder::Pending(_) => None,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, ValueHolder::Pending(_))
    }

    /// True once a weak/soft holder's referent has been collected. Drives
    /// the opportunistic `RemovalTask(COLLECTED)` path during drain.
    pub(crate) fn is_collected(&self) -> bool {
        match self {
            ValueHolder::Weak(w) | ValueHolder::Soft(w) => w.strong_count() == 0,
            _ => false,
        }
    }
}

/// Sentinel meaning "no deadline scheduled" for the atomic deadline
/// fields below (nanosecond deadlines of exactly 0 would require a
/// request at the epoch, which a monotonic ticker never produces).
pub(crate) const NO_DEADLINE: u64 = u64::MAX;

/// The value-bearing object addressed directly from `EntryStore`. Safe to
/// read and update without the maintenance lock; only `slab_id` ties it
/// back to its structural `Link`.
pub(crate) struct Handle<K, V> {
    pub key: K,
    pub value: RwLock<ValueHolder<V>>,
    pub weight: AtomicU32,
    pub slab_id: EntryId,
    pub access_expire_at: AtomicU64,
    pub write_expire_at: AtomicU64,
    pub refresh_at: AtomicU64,
    /// Set once this key's mapping has been removed from the store, so a
    /// drain that finds a stale read-buffer reference can recognize it
    /// instead of double-processing.
    pub retired: AtomicBool,
}

impl<K, V> Handle<K, V> {
    pub fn new(key: K, value: ValueHolder<V>, weight: u32, slab_id: EntryId) -> Self {
        Handle {
            key,
            value: RwLock::new(value),
            weight: AtomicU32::new(weight),
            slab_id,
            access_expire_at: AtomicU64::new(NO_DEADLINE),
            write_expire_at: AtomicU64::new(NO_DEADLINE),
            refresh_at: AtomicU64::new(NO_DEADLINE),
            retired: AtomicBool::new(false),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn mark_retired(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }
}

/// The structural record threaded through the three access-order queues.
/// Lives in the coordinator's slab; mutated only under the maintenance
/// lock.
pub(crate) struct Link<K> {
    pub key: K,
    pub weight: u32,
    pub queue: QueueTag,
    pub prev: Option<EntryId>,
    pub next: Option<EntryId>,
}

impl<K> Link<K> {
    pub fn new(key: K, weight: u32) -> Self {
        Link { key, weight, queue: QueueTag::Dead, prev: None, next: None }
    }
}
