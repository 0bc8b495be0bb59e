//! The Entry Store: a concurrent hash index from key to value-bearing
//! `Handle`.
//!
//! Grounded on the teacher's own migration guidance in
//! `common/concurrent_map.rs`, which prescribes `dashmap::DashMap` over
//! `Arc<RwLock<HashMap>>` for exactly this read-heavy, high-concurrency
//! shape ("Examples from RustyDB Codebase" §`src/buffer/manager.rs`). The
//! store is the single source of truth for whether a key is present;
//! structural queue position for an admitted key is bookkept separately,
//! under the maintenance lock, and referenced from the handle only by
//! `slab_id` (see `entry.rs`).

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;

use crate::entry::Handle;

pub(crate) struct EntryStore<K, V> {
    index: DashMap<K, Arc<Handle<K, V>>>,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        EntryStore { index: DashMap::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EntryStore { index: DashMap::with_capacity(capacity) }
    }

    /// Atomic lookup; lock-free from the caller's perspective (striped
    /// internally by `DashMap`).
    pub fn get(&self, key: &K) -> Option<Arc<Handle<K, V>>> {
        self.index.get(key).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Unconditionally associates `key` with `handle`, returning whatever
    /// was previously indexed (the caller is responsible for retiring it).
    pub fn insert(&self, key: K, handle: Arc<Handle<K, V>>) -> Option<Arc<Handle<K, V>>> {
        self.index.insert(key, handle)
    }

    /// Inserts only if absent; on success returns `None`, on a
    /// pre-existing mapping returns the existing handle without replacing
    /// it.
    pub fn insert_if_absent(&self, key: K, handle: Arc<Handle<K, V>>) -> Option<Arc<Handle<K, V>>> {
        match self.index.entry(key) {
            DashEntry::Occupied(occupied) => Some(occupied.get().clone()),
            DashEntry::Vacant(vacant) => {
                vacant.insert(handle);
                None
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<Arc<Handle<K, V>>> {
        self.index.remove(key).map(|(_, handle)| handle)
    }

    /// Conditional remove: only removes if the indexed handle is still the
    /// one identified by `slab_id`, guarding against a racing replace.
    pub fn remove_if_slab_id(&self, key: &K, expected_slab_id: crate::slab::EntryId) -> Option<Arc<Handle<K, V>>> {
        self.index
            .remove_if(key, |_, handle| handle.slab_id == expected_slab_id)
            .map(|(_, handle)| handle)
    }

    pub fn clear(&self) {
        self.index.clear();
    }

    pub fn iter_handles(&self) -> Vec<Arc<Handle<K, V>>> {
        self.index.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ValueHolder;
    use crate::slab::Slab;

    fn handle(key: &'static str, slab: &mut Slab<u32>) -> Arc<Handle<&'static str, u32>> {
        let slab_id = slab.insert(0);
        Arc::new(Handle::new(key, ValueHolder::Strong(Arc::new(1u32)), 1, slab_id))
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store: EntryStore<&'static str, u32> = EntryStore::new();
        let mut slab = Slab::new();
        let h = handle("k", &mut slab);
        assert!(store.insert("k", h.clone()).is_none());
        assert!(Arc::ptr_eq(&store.get(&"k").unwrap(), &h));
    }

    #[test]
    fn insert_if_absent_does_not_clobber() {
        let store: EntryStore<&'static str, u32> = EntryStore::new();
        let mut slab = Slab::new();
        let a = handle("k", &mut slab);
        let b = handle("k", &mut slab);
        assert!(store.insert_if_absent("k", a.clone()).is_none());
        let existing = store.insert_if_absent("k", b).unwrap();
        assert!(Arc::ptr_eq(&existing, &a));
    }

    #[test]
    fn remove_clears_the_mapping() {
        let store: EntryStore<&'static str, u32> = EntryStore::new();
        let mut slab = Slab::new();
        let h = handle("k", &mut slab);
        store.insert("k", h);
        assert!(store.remove(&"k").is_some());
        assert!(store.get(&"k").is_none());
    }
}
