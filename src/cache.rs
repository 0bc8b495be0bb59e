//! The `Cache` façade and the Maintenance Coordinator (spec §4.6): the one
//! piece that ties the Entry Store, Frequency Sketch, Access Order Queues,
//! and the two buffers together behind a single non-reentrant lock.
//!
//! Grounded on the teacher's `cache::query_cache::QueryCache` for the
//! overall façade shape (config, storage, statistics as named fields) and
//! on the buffer-pool neighbor's background-maintenance pattern (a spawned
//! loop draining a queue under a lock) for the drain cycle, generalized
//! per DESIGN.md from the teacher's single `RwLock<HashMap>` + `VecDeque`
//! pair to the full read-buffer/write-buffer/three-queue W-TinyLFU
//! machinery spec.md describes.

use std::collections::VecDeque;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use futures::channel::oneshot;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::builder::{
    CacheBuilder, CacheWriter, KeyReferenceStrength, Loader, RemovalListener, Ticker, ValueReferenceStrength,
    Weigher,
};
use crate::buffers::{OfferOutcome, ReadBuffer, WriteBuffer, WriteTask};
use crate::entry::{Handle, Link, LoadFuture, QueueTag, ValueHolder, NO_DEADLINE};
use crate::error::{CacheError, Result};
use crate::executor::Executor;
use crate::expiry::{ExpirationWheel, RefreshTracker};
use crate::notify::RemovalDispatcher;
use crate::policy::Policy;
use crate::queues::{QueueId, Queues};
use crate::slab::{EntryId, Slab};
use crate::sketch::FrequencySketch;
use crate::stats::{CacheStatistics, CacheStatisticsCounters, RemovalCause};
use crate::store::EntryStore;

/// Read-buffer stripe items drained per stripe, per drain cycle. A fixed
/// quantum bounds how long any single drain holds the maintenance lock.
const READ_QUANTUM: usize = 64;

/// Structural state mutated only while the maintenance lock is held:
/// the slab of intrusive links, the three access-order queues, the
/// expiration wheel, and the coordinator's own view of total weight.
pub(crate) struct MaintenanceState<K> {
    pub(crate) slab: Slab<Link<K>>,
    pub(crate) queues: Queues,
    wheel: ExpirationWheel,
    total_weight: u64,
}

impl<K> MaintenanceState<K> {
    fn new() -> Self {
        MaintenanceState { slab: Slab::new(), queues: Queues::new(), wheel: ExpirationWheel::new(), total_weight: 0 }
    }
}

pub(crate) struct Shared<K, V> {
    store: EntryStore<K, V>,
    pub(crate) maintenance: Mutex<MaintenanceState<K>>,
    sketch: FrequencySketch,
    read_buffer: ReadBuffer,
    write_buffer: WriteBuffer,
    refresh_tracker: RefreshTracker<K>,
    dispatcher: RemovalDispatcher<K, Arc<V>>,
    stats: CacheStatisticsCounters,

    pub(crate) max_weight: AtomicU64,
    window_max: AtomicU64,
    protected_max: AtomicU64,

    weigher: Arc<dyn Weigher<K, V>>,
    removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    cache_writer: Option<Arc<dyn CacheWriter<K, V>>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
    executor: Arc<dyn Executor>,
    ticker: Arc<dyn Ticker>,

    expire_after_access_nanos: Option<u64>,
    expire_after_write_nanos: Option<u64>,
    refresh_after_write_nanos: Option<u64>,
    #[allow(dead_code)] // reported via `key_reference_strength()`; see builder.rs's doc comment
    key_reference_strength: KeyReferenceStrength,
    value_reference_strength: ValueReferenceStrength,
    statistics_enabled: bool,

    drain_scheduled: AtomicBool,

    /// Set by `Cache::poison` once a drain cycle detects a structural
    /// invariant violation (§7: "internal invariants violations... fatal;
    /// the cache marks itself invalid"). Checked by every fallible public
    /// operation via `check_invalidated`.
    invalidated: AtomicBool,
    invalidated_reason: OnceCell<String>,
}

/// A bounded, concurrent, near-optimal key→value cache built on
/// Window-TinyLFU (spec.md §1-§2). Cheap to clone: every clone shares the
/// same underlying store, queues, and buffers.
pub struct Cache<K, V> {
    pub(crate) shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache { shared: Arc::clone(&self.shared) }
    }
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// `Wmax = ceil(0.01 * Cmax)` (minimum 1, except when `Cmax == 0`),
/// `Mmax = ceil(0.80 * (Cmax - Wmax))`, per §3. Returns `(window_max,
/// protected_max)`; `Pmax` is `Cmax - Wmax - Mmax` and is never stored
/// directly since it's only ever used as `Cmax - Wmax` minus the running
/// weight of Protected.
fn region_targets(max_weight: u64) -> (u64, u64) {
    if max_weight == 0 {
        return (0, 0);
    }
    let window_max = ((max_weight as f64) * 0.01).ceil().max(1.0) as u64;
    let window_max = window_max.min(max_weight);
    let main_budget = max_weight - window_max;
    let protected_max = ((main_budget as f64) * 0.80).ceil() as u64;
    (window_max, protected_max.min(main_budget))
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Entry point for configuration; mirrors Caffeine's
    /// `Caffeine.newBuilder()` and the teacher's `CacheConfig::default()`
    /// plus builder-style setters.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn new(builder: CacheBuilder<K, V>) -> Self {
        let max_weight = builder.maximum_weight.unwrap_or(u64::MAX);
        let (window_max, protected_max) = if max_weight == u64::MAX {
            (u64::MAX, u64::MAX)
        } else {
            region_targets(max_weight)
        };
        let sketch_size = if max_weight != u64::MAX && max_weight > 0 {
            max_weight
        } else {
            builder.initial_capacity.max(256) as u64
        };

        let shared = Shared {
            store: EntryStore::with_capacity(builder.initial_capacity),
            maintenance: Mutex::new(MaintenanceState::new()),
            sketch: FrequencySketch::new(sketch_size),
            read_buffer: ReadBuffer::with_default_striping(),
            write_buffer: WriteBuffer::new(builder.initial_capacity.max(256)),
            refresh_tracker: RefreshTracker::new(),
            dispatcher: RemovalDispatcher::new(),
            stats: CacheStatisticsCounters::default(),
            max_weight: AtomicU64::new(max_weight),
            window_max: AtomicU64::new(window_max),
            protected_max: AtomicU64::new(protected_max),
            weigher: builder.weigher,
            removal_listener: builder.removal_listener,
            cache_writer: builder.cache_writer,
            loader: builder.loader,
            executor: builder.executor,
            ticker: builder.ticker,
            expire_after_access_nanos: builder.expire_after_access.map(|d| d.as_nanos() as u64),
            expire_after_write_nanos: builder.expire_after_write.map(|d| d.as_nanos() as u64),
            refresh_after_write_nanos: builder.refresh_after_write.map(|d| d.as_nanos() as u64),
            key_reference_strength: builder.key_reference_strength,
            value_reference_strength: builder.value_reference_strength,
            statistics_enabled: builder.statistics_enabled,
            drain_scheduled: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
            invalidated_reason: OnceCell::new(),
        };
        Cache { shared: Arc::new(shared) }
    }

    // ---- hot path ----------------------------------------------------

    /// `getIfPresent` (§6): the infallible hot read path. Never blocks.
    pub fn get_if_present(&self, key: &K) -> Option<Arc<V>> {
        let handle = self.shared.store.get(key)?;
        if handle.is_retired() {
            self.record_miss();
            return None;
        }
        let now = self.shared.ticker.now_nanos();
        if self.is_expired(&handle, now) {
            self.expire_now(key, &handle);
            self.record_miss();
            return None;
        }
        let value = match handle.value.read().peek() {
            Some(v) => v,
            None => {
                if handle.value.read().is_collected() {
                    self.collect_now(key, &handle);
                }
                self.record_miss();
                return None;
            }
        };
        self.record_hit();
        self.apply_expiry_on_read(&handle);
        if self.shared.read_buffer.offer(handle.slab_id) == OfferOutcome::Full {
            self.trigger_drain();
        }
        self.maybe_trigger_refresh(key, &handle);
        Some(value)
    }

    /// `put` (§6). Fails only if the weigher panics or a configured
    /// `cacheWriter` rejects the write, in which case the cache is left
    /// unchanged (§7).
    ///
    /// Overwriting an already-present key updates the existing `Handle` in
    /// place and enqueues an `UpdateTask` (§4.5) rather than retiring the
    /// old entry and admitting a fresh one at Window's tail -- the latter
    /// would demote an already-Protected/Probation hot key back into
    /// Window on every value overwrite, defeating W-TinyLFU's
    /// frequency-based protection for write-heavy hot keys. See `replace`
    /// for the same handling of an in-place value swap.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.check_invalidated()?;
        let value_arc = Arc::new(value);
        let weight = self.catch_weigh(&key, &value_arc)?;
        if let Some(writer) = &self.shared.cache_writer {
            writer.write(&key, value_arc.as_ref()).map_err(CacheError::WriterFailed)?;
        }

        if let Some(existing) = self.shared.store.get(&key) {
            if !existing.is_retired() {
                self.overwrite_in_place(&key, &existing, value_arc, weight);
                return Ok(());
            }
        }

        let holder = self.wrap_value(value_arc);
        let slab_id = {
            let mut guard = self.shared.maintenance.lock();
            guard.slab.insert(Link::new(key.clone(), weight))
        };
        let handle = Arc::new(Handle::new(key.clone(), holder, weight, slab_id));
        self.apply_expiry_on_write(&handle);

        if let Some(old) = self.shared.store.insert(key.clone(), handle) {
            // Lost a race against a concurrent put/insert for the same
            // key between the lookup above and this unconditional
            // insert; fall back to the old retire-and-replace path
            // rather than leaving two live handles for one key.
            old.mark_retired();
            if let Some(old_value) = old.value.read().peek() {
                self.notify_removal(key.clone(), old_value, RemovalCause::Replaced);
            }
            self.shared.write_buffer.push(WriteTask::Removal { id: old.slab_id, cause: RemovalCause::Replaced });
        }
        self.shared.write_buffer.push(WriteTask::Add { id: slab_id });
        self.after_write_enqueue();
        Ok(())
    }

    /// Swaps an already-present `Handle`'s value and weight in place and
    /// enqueues an `Update` task so the drain cycle preserves the entry's
    /// current queue position instead of treating the overwrite as a new
    /// admission. Shared by `put` and `replace`.
    fn overwrite_in_place(&self, key: &K, handle: &Arc<Handle<K, V>>, value_arc: Arc<V>, new_weight: u32) {
        let old_value = handle.value.read().peek();
        *handle.value.write() = self.wrap_value(value_arc);
        handle.weight.store(new_weight, Ordering::Relaxed);
        self.apply_expiry_on_write(handle);
        if let Some(old) = old_value {
            self.notify_removal(key.clone(), old, RemovalCause::Replaced);
        }
        self.shared.write_buffer.push(WriteTask::Update { id: handle.slab_id, new_weight });
        self.after_write_enqueue();
    }

    /// `putIfAbsent` (§4.1). On a lost race, returns the winner's value
    /// without touching the cache further.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<Arc<V>>> {
        self.check_invalidated()?;
        let value_arc = Arc::new(value);
        let weight = self.catch_weigh(&key, &value_arc)?;
        let holder = self.wrap_value(Arc::clone(&value_arc));
        let slab_id = {
            let mut guard = self.shared.maintenance.lock();
            guard.slab.insert(Link::new(key.clone(), weight))
        };
        let handle = Arc::new(Handle::new(key.clone(), holder, weight, slab_id));
        self.apply_expiry_on_write(&handle);

        match self.shared.store.insert_if_absent(key.clone(), handle) {
            None => {
                if let Some(writer) = &self.shared.cache_writer {
                    if let Err(e) = writer.write(&key, value_arc.as_ref()) {
                        log::warn!("cache writer rejected an admitted putIfAbsent key: {e}");
                    }
                }
                self.shared.write_buffer.push(WriteTask::Add { id: slab_id });
                self.after_write_enqueue();
                Ok(None)
            }
            Some(existing) => {
                let mut guard = self.shared.maintenance.lock();
                guard.slab.remove(slab_id);
                drop(guard);
                Ok(existing.value.read().peek())
            }
        }
    }

    /// `replace(k,v)` (§4.1): updates the value of an existing mapping in
    /// place (same slab slot, so only its weight -- not its queue
    /// recency -- may change structurally). Returns `false` if absent.
    pub fn replace(&self, key: &K, value: V) -> Result<bool> {
        self.check_invalidated()?;
        let handle = match self.shared.store.get(key) {
            Some(h) => h,
            None => return Ok(false),
        };
        let value_arc = Arc::new(value);
        let new_weight = self.catch_weigh(key, &value_arc)?;
        if let Some(writer) = &self.shared.cache_writer {
            writer.write(key, value_arc.as_ref()).map_err(CacheError::WriterFailed)?;
        }
        self.overwrite_in_place(key, &handle, value_arc, new_weight);
        Ok(true)
    }

    /// `replace(k,old,new)` (§4.1): compare-then-replace. Not a true CAS
    /// against concurrent writers (the comparison and the replace are two
    /// separate store reads), documented as an approximation in
    /// DESIGN.md.
    pub fn replace_if_equals(&self, key: &K, old: &V, new: V) -> Result<bool>
    where
        V: PartialEq,
    {
        self.check_invalidated()?;
        let matches = match self.shared.store.get(key) {
            Some(handle) => handle.value.read().peek().map(|v| *v == *old).unwrap_or(false),
            None => false,
        };
        if !matches {
            return Ok(false);
        }
        self.replace(key, new)
    }

    /// `compute`-style atomic transformer (§4.1), approximated (see
    /// DESIGN.md) as a read followed by `replace`/`invalidate` rather
    /// than a single compare-and-swap.
    pub fn compute_if_present<F>(&self, key: &K, remap: F) -> Result<Option<Arc<V>>>
    where
        F: FnOnce(&K, &V) -> Option<V>,
    {
        self.check_invalidated()?;
        let current = match self.get_if_present(key) {
            Some(v) => v,
            None => return Ok(None),
        };
        match remap(key, current.as_ref()) {
            Some(new_value) => {
                self.replace(key, new_value)?;
                Ok(self.get_if_present(key))
            }
            None => {
                self.invalidate(key)?;
                Ok(None)
            }
        }
    }

    /// `get(key, mappingFunction)` (§6): a loading get. Concurrent callers
    /// racing on the same missing key coalesce onto the winner's load via
    /// a `Pending` value holder (Design Notes §9) rather than each
    /// invoking `mapping` independently.
    pub fn get_with<F>(&self, key: K, mapping: F) -> Result<Arc<V>>
    where
        F: FnOnce(&K) -> std::result::Result<V, String>,
    {
        self.check_invalidated()?;
        if let Some(v) = self.get_if_present(&key) {
            return Ok(v);
        }

        let (tx, rx) = oneshot::channel::<std::result::Result<Arc<V>, String>>();
        let fut: LoadFuture<V> = {
            let boxed: Pin<Box<dyn Future<Output = std::result::Result<Arc<V>, String>> + Send>> =
                Box::pin(rx.map(|r| r.unwrap_or_else(|_| Err("loader cancelled".to_string()))));
            boxed.shared()
        };

        let slab_id = {
            let mut guard = self.shared.maintenance.lock();
            guard.slab.insert(Link::new(key.clone(), 0))
        };
        let pending_handle = Arc::new(Handle::new(key.clone(), ValueHolder::Pending(fut), 0, slab_id));

        match self.shared.store.insert_if_absent(key.clone(), Arc::clone(&pending_handle)) {
            None => {
                let start = self.shared.ticker.now_nanos();
                let outcome = mapping(&key);
                let nanos = self.shared.ticker.now_nanos().saturating_sub(start);
                match outcome {
                    Ok(value) => {
                        let value_arc = Arc::new(value);
                        self.record_load_success(nanos);
                        let _ = tx.send(Ok(value_arc.clone()));
                        self.commit_loaded_value(&key, &pending_handle, value_arc.clone())?;
                        Ok(value_arc)
                    }
                    Err(e) => {
                        self.record_load_failure(nanos);
                        let _ = tx.send(Err(e.clone()));
                        self.shared.store.remove_if_slab_id(&key, slab_id);
                        let mut guard = self.shared.maintenance.lock();
                        guard.slab.remove(slab_id);
                        Err(CacheError::LoaderFailed(e))
                    }
                }
            }
            Some(existing) => {
                {
                    let mut guard = self.shared.maintenance.lock();
                    guard.slab.remove(slab_id);
                }
                if let Some(value) = existing.value.read().peek() {
                    return Ok(value);
                }
                let awaited = match &*existing.value.read() {
                    ValueHolder::Pending(fut) => Some(fut.clone()),
                    _ => None,
                };
                match awaited {
                    Some(fut) => futures::executor::block_on(fut).map_err(CacheError::LoaderFailed),
                    None => Err(CacheError::LoaderFailed("value unavailable, retry".to_string())),
                }
            }
        }
    }

    fn commit_loaded_value(&self, key: &K, pending_handle: &Arc<Handle<K, V>>, value_arc: Arc<V>) -> Result<()> {
        let weight = self.catch_weigh(key, &value_arc)?;
        if let Some(writer) = &self.shared.cache_writer {
            if let Err(e) = writer.write(key, value_arc.as_ref()) {
                self.shared.store.remove_if_slab_id(key, pending_handle.slab_id);
                let mut guard = self.shared.maintenance.lock();
                guard.slab.remove(pending_handle.slab_id);
                return Err(CacheError::WriterFailed(e));
            }
        }
        *pending_handle.value.write() = self.wrap_value(value_arc);
        pending_handle.weight.store(weight, Ordering::Relaxed);
        self.apply_expiry_on_write(pending_handle);
        {
            let mut guard = self.shared.maintenance.lock();
            if let Some(link) = guard.slab.get_mut(pending_handle.slab_id) {
                link.weight = weight;
            }
        }
        self.shared.write_buffer.push(WriteTask::Add { id: pending_handle.slab_id });
        self.after_write_enqueue();
        Ok(())
    }

    /// `getAll(keys, bulkLoader)` (§6), implemented per SPEC_FULL as a
    /// per-key loop over `get_with` rather than a batched load.
    pub fn get_all_with<I, F>(&self, keys: I, bulk_loader: F) -> Result<Vec<(K, Arc<V>)>>
    where
        I: IntoIterator<Item = K>,
        F: Fn(&K) -> std::result::Result<V, String>,
    {
        keys.into_iter()
            .map(|k| {
                let v = self.get_with(k.clone(), |key| bulk_loader(key))?;
                Ok((k, v))
            })
            .collect()
    }

    /// `putAll` (§6): a per-key loop, short-circuiting on the first error.
    pub fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in entries {
            self.put(k, v)?;
        }
        Ok(())
    }

    /// `invalidate` (§6).
    pub fn invalidate(&self, key: &K) -> Result<()> {
        self.check_invalidated()?;
        if let Some(writer) = &self.shared.cache_writer {
            writer.delete(key).map_err(CacheError::WriterFailed)?;
        }
        if let Some(handle) = self.shared.store.remove(key) {
            handle.mark_retired();
            if let Some(value) = handle.value.read().peek() {
                self.notify_removal(key.clone(), value, RemovalCause::Explicit);
            }
            self.shared.write_buffer.push(WriteTask::Removal { id: handle.slab_id, cause: RemovalCause::Explicit });
            self.after_write_enqueue();
        }
        Ok(())
    }

    /// `invalidateAll` (§6). Per-key writer failures are logged and do
    /// not stop the sweep -- a single rejecting writer should not prevent
    /// the rest of the cache from being cleared.
    pub fn invalidate_all(&self) {
        for handle in self.shared.store.iter_handles() {
            let key = handle.key.clone();
            if let Err(e) = self.invalidate(&key) {
                log::warn!("invalidateAll: cache writer rejected a delete: {e}");
            }
        }
    }

    /// `estimatedSize` (§6): live entry count, not weight.
    pub fn estimated_size(&self) -> usize {
        self.shared.store.len()
    }

    /// `weightedSize`, named in SPEC_FULL's supplemented features to
    /// distinguish from `estimated_size` (Scenario 2 depends on it).
    pub fn weighted_size(&self) -> u64 {
        self.shared.maintenance.lock().total_weight
    }

    /// `stats` (§6).
    pub fn stats(&self) -> CacheStatistics {
        self.shared.stats.snapshot()
    }

    /// `cleanUp` (§6): forces one full drain cycle synchronously, as
    /// opposed to the opportunistic non-blocking trigger the hot path
    /// uses.
    pub fn clean_up(&self) {
        let mut guard = self.shared.maintenance.lock();
        self.run_drain_cycle(&mut guard);
    }

    /// `asMap()` (§6): an owned snapshot, not a live view -- Rust has no
    /// safe way to hand out a mutable reference into state the
    /// coordinator may restructure concurrently.
    pub fn as_map(&self) -> Vec<(K, Arc<V>)> {
        self.shared
            .store
            .iter_handles()
            .into_iter()
            .filter(|h| !h.is_retired())
            .filter_map(|h| h.value.read().peek().map(|v| (h.key.clone(), v)))
            .collect()
    }

    /// `policy()` (§6): the `coldest`/`hottest`/`maximum`/`setMaximum`
    /// introspection surface.
    pub fn policy(&self) -> Policy<'_, K, V> {
        Policy { cache: self }
    }

    /// Backs `Policy::set_maximum`: updates the target region budgets and,
    /// if the new maximum is smaller, forces a synchronous drain down to
    /// it.
    pub(crate) fn set_maximum(&self, new_maximum: u64) {
        let (window_max, protected_max) =
            if new_maximum == u64::MAX { (u64::MAX, u64::MAX) } else { region_targets(new_maximum) };
        self.shared.max_weight.store(new_maximum, Ordering::Relaxed);
        self.shared.window_max.store(window_max, Ordering::Relaxed);
        self.shared.protected_max.store(protected_max, Ordering::Relaxed);
        self.clean_up();
    }

    pub fn key_reference_strength(&self) -> KeyReferenceStrength {
        self.shared.key_reference_strength
    }

    // ---- internals -----------------------------------------------------

    fn catch_weigh(&self, key: &K, value: &Arc<V>) -> Result<u32> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.shared.weigher.weigh(key, value.as_ref())))
            .map_err(|_| CacheError::WeigherFailed("weigher panicked".to_string()))
    }

    fn wrap_value(&self, value: Arc<V>) -> ValueHolder<V> {
        match self.shared.value_reference_strength {
            ValueReferenceStrength::Strong => ValueHolder::Strong(value),
            ValueReferenceStrength::Weak => ValueHolder::Weak(Arc::downgrade(&value)),
            ValueReferenceStrength::Soft => ValueHolder::Soft(Arc::downgrade(&value)),
        }
    }

    /// `true` once a drain cycle has detected an internal invariant
    /// violation and marked the cache invalid per §7. Once set, every
    /// fallible public operation fails with `CacheError::Invalidated`
    /// instead of operating on possibly-corrupted structural state.
    pub fn is_invalidated(&self) -> bool {
        self.shared.invalidated.load(Ordering::Relaxed)
    }

    /// Marks the cache invalid following a detected queue/weight
    /// accounting inconsistency (§7's "internal invariants violations...
    /// fatal"). Idempotent: only the first reason is retained.
    fn poison(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("cache invariant violated, marking cache invalid: {reason}");
        let _ = self.shared.invalidated_reason.set(reason);
        self.shared.invalidated.store(true, Ordering::SeqCst);
    }

    fn check_invalidated(&self) -> Result<()> {
        if self.shared.invalidated.load(Ordering::SeqCst) {
            let reason =
                self.shared.invalidated_reason.get().cloned().unwrap_or_else(|| "unknown invariant violation".to_string());
            return Err(CacheError::Invalidated(reason));
        }
        Ok(())
    }

    fn record_hit(&self) {
        if self.shared.statistics_enabled {
            self.shared.stats.record_hit();
        }
    }

    fn record_miss(&self) {
        if self.shared.statistics_enabled {
            self.shared.stats.record_miss();
        }
    }

    fn record_load_success(&self, nanos: u64) {
        if self.shared.statistics_enabled {
            self.shared.stats.record_load_success(nanos);
        }
    }

    fn record_load_failure(&self, nanos: u64) {
        if self.shared.statistics_enabled {
            self.shared.stats.record_load_failure(nanos);
        }
    }

    fn is_expired(&self, handle: &Handle<K, V>, now: u64) -> bool {
        let access = handle.access_expire_at.load(Ordering::Relaxed);
        let write = handle.write_expire_at.load(Ordering::Relaxed);
        (access != NO_DEADLINE && now >= access) || (write != NO_DEADLINE && now >= write)
    }

    fn apply_expiry_on_write(&self, handle: &Handle<K, V>) {
        let now = self.shared.ticker.now_nanos();
        if let Some(ttl) = self.shared.expire_after_write_nanos {
            let deadline = now.saturating_add(ttl);
            handle.write_expire_at.store(deadline, Ordering::Relaxed);
            self.schedule_expiry(handle.slab_id, deadline);
        }
        if let Some(ttl) = self.shared.expire_after_access_nanos {
            let deadline = now.saturating_add(ttl);
            handle.access_expire_at.store(deadline, Ordering::Relaxed);
            self.schedule_expiry(handle.slab_id, deadline);
        }
        if let Some(ttl) = self.shared.refresh_after_write_nanos {
            handle.refresh_at.store(now.saturating_add(ttl), Ordering::Relaxed);
        }
    }

    fn apply_expiry_on_read(&self, handle: &Handle<K, V>) {
        if let Some(ttl) = self.shared.expire_after_access_nanos {
            let now = self.shared.ticker.now_nanos();
            let deadline = now.saturating_add(ttl);
            handle.access_expire_at.store(deadline, Ordering::Relaxed);
            self.schedule_expiry(handle.slab_id, deadline);
        }
    }

    fn schedule_expiry(&self, id: EntryId, deadline_nanos: u64) {
        self.shared.write_buffer.push(WriteTask::ExpireReorder { id, deadline_nanos });
    }

    fn maybe_trigger_refresh(&self, key: &K, handle: &Arc<Handle<K, V>>) {
        let loader = match &self.shared.loader {
            Some(l) => l,
            None => return,
        };
        if self.shared.refresh_after_write_nanos.is_none() {
            return;
        }
        let refresh_at = handle.refresh_at.load(Ordering::Relaxed);
        if refresh_at == NO_DEADLINE || self.shared.ticker.now_nanos() < refresh_at {
            return;
        }
        if !self.shared.refresh_tracker.try_claim(key) {
            return;
        }
        let cache = self.clone();
        let loader = Arc::clone(loader);
        let key = key.clone();
        self.shared.executor.execute(Box::new(move || {
            let start = cache.shared.ticker.now_nanos();
            let result = loader.load(&key);
            let nanos = cache.shared.ticker.now_nanos().saturating_sub(start);
            match result {
                Ok(new_value) => {
                    cache.record_load_success(nanos);
                    if let Err(e) = cache.put(key.clone(), new_value) {
                        log::warn!("refresh-after-write commit failed for a key: {e}");
                    }
                }
                Err(e) => {
                    cache.record_load_failure(nanos);
                    log::warn!("refresh-after-write loader failed for a key: {e}");
                }
            }
            cache.shared.refresh_tracker.release(&key);
        }));
    }

    fn expire_now(&self, key: &K, handle: &Arc<Handle<K, V>>) {
        if self.shared.store.remove_if_slab_id(key, handle.slab_id).is_some() {
            handle.mark_retired();
            if let Some(value) = handle.value.read().peek() {
                self.notify_removal(key.clone(), value, RemovalCause::Expired);
            }
            self.shared.write_buffer.push(WriteTask::Removal { id: handle.slab_id, cause: RemovalCause::Expired });
            self.trigger_drain();
        }
    }

    fn collect_now(&self, key: &K, handle: &Arc<Handle<K, V>>) {
        if self.shared.store.remove_if_slab_id(key, handle.slab_id).is_some() {
            handle.mark_retired();
            self.shared.write_buffer.push(WriteTask::Removal { id: handle.slab_id, cause: RemovalCause::Collected });
            self.trigger_drain();
        }
    }

    fn notify_removal(&self, key: K, value: Arc<V>, cause: RemovalCause) {
        if self.shared.removal_listener.is_none() {
            return;
        }
        self.shared.dispatcher.push(key, value, cause);
        if self.shared.dispatcher.claim_drain() {
            let cache = self.clone();
            self.shared.executor.execute(Box::new(move || cache.drain_notifications()));
        }
    }

    /// Pops and invokes the listener until the dispatcher's queue is
    /// drained, then releases the single-flight claim -- never before, so
    /// at most one `drain_notifications` call is ever running at a time
    /// (the invariant `RemovalDispatcher` documents). Releasing before the
    /// pop loop finishes would let a concurrent `notify_removal` observe
    /// the claim as free and schedule a second, overlapping drain task
    /// that pops from the same queue and invokes the listener out of
    /// commit order (violating §5's per-key notification ordering).
    ///
    /// A push can still land between this loop's last `pop` returning
    /// `None` and `release_drain`; since the claim was held at that
    /// moment, the pushing `notify_removal` call's own `claim_drain`
    /// would have failed and scheduled nothing. The release/recheck loop
    /// below catches that: after releasing, if the queue is non-empty,
    /// this call tries to reclaim it and keep draining itself rather than
    /// stranding the item with no drain scheduled.
    fn drain_notifications(&self) {
        let listener = match &self.shared.removal_listener {
            Some(l) => l,
            None => {
                self.shared.dispatcher.release_drain();
                return;
            }
        };
        loop {
            while let Some((key, value, cause)) = self.shared.dispatcher.pop() {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    listener.on_removal(&key, value.as_ref(), cause)
                }));
                if result.is_err() {
                    log::warn!("removal listener panicked for cause {cause:?}");
                }
            }
            self.shared.dispatcher.release_drain();
            if self.shared.dispatcher.is_empty() || !self.shared.dispatcher.claim_drain() {
                break;
            }
        }
    }

    fn after_write_enqueue(&self) {
        if self.shared.write_buffer.should_assist_drain() {
            self.force_drain();
        } else {
            self.trigger_drain();
        }
    }

    fn trigger_drain(&self) {
        if self.shared.drain_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let cache = self.clone();
        self.shared.executor.execute(Box::new(move || {
            cache.shared.drain_scheduled.store(false, Ordering::Release);
            cache.try_drain();
        }));
    }

    fn try_drain(&self) {
        let mut guard = match self.shared.maintenance.try_lock() {
            Some(g) => g,
            None => return,
        };
        self.run_drain_cycle(&mut guard);
        drop(guard);
        if !self.shared.write_buffer.is_empty() {
            self.trigger_drain();
        }
    }

    fn force_drain(&self) {
        let mut guard = self.shared.maintenance.lock();
        self.run_drain_cycle(&mut guard);
    }

    /// One full drain cycle (§4.6 steps 2-5); the caller already holds
    /// the maintenance lock (step 1) and releases it on return (step 6).
    fn run_drain_cycle(&self, state: &mut MaintenanceState<K>) {
        self.drain_read_buffer(state);
        self.drain_write_buffer(state);
        self.evict_to_capacity(state);
        self.process_expirations(state);
    }

    fn drain_read_buffer(&self, state: &mut MaintenanceState<K>) {
        let sketch = &self.shared.sketch;
        let protected_max = self.shared.protected_max.load(Ordering::Relaxed);
        self.shared.read_buffer.drain_into(READ_QUANTUM, |entry_id| {
            let (queue, key_hash) = match state.slab.get(entry_id) {
                Some(link) if link.queue != QueueTag::Dead => (link.queue, hash_key(&link.key)),
                _ => return,
            };
            sketch.increment(key_hash);
            match queue {
                QueueTag::Window => state.queues.move_to_tail(&mut state.slab, entry_id),
                QueueTag::Probation => {
                    state.queues.move_to_queue(&mut state.slab, entry_id, QueueId::Protected);
                    while protected_max != u64::MAX && state.queues.weight(QueueId::Protected) > protected_max {
                        match state.queues.head(QueueId::Protected) {
                            Some(head) => state.queues.move_to_queue(&mut state.slab, head, QueueId::Probation),
                            None => break,
                        }
                    }
                }
                QueueTag::Protected => state.queues.move_to_tail(&mut state.slab, entry_id),
                QueueTag::Dead => unreachable!("filtered above"),
            }
        });
    }

    fn drain_write_buffer(&self, state: &mut MaintenanceState<K>) {
        while let Some(task) = self.shared.write_buffer.pop() {
            match task {
                WriteTask::Add { id } => {
                    if state.slab.contains(id) {
                        let weight = state.slab.get(id).unwrap().weight;
                        state.queues.append_tail(&mut state.slab, QueueId::Window, id);
                        state.total_weight += weight as u64;
                    }
                }
                WriteTask::Update { id, new_weight } => {
                    let delta = if let Some(link) = state.slab.get_mut(id) {
                        let old_weight = link.weight;
                        link.weight = new_weight;
                        let tag = link.queue;
                        state.queues.adjust_weight_for_tag(tag, new_weight as i64 - old_weight as i64);
                        Some(new_weight as i64 - old_weight as i64)
                    } else {
                        None
                    };
                    if let Some(delta) = delta {
                        state.total_weight = (state.total_weight as i64 + delta).max(0) as u64;
                        state.queues.move_to_tail(&mut state.slab, id);
                    }
                }
                WriteTask::Removal { id, cause: _ } => {
                    if state.slab.contains(id) {
                        let weight = state.slab.get(id).unwrap().weight;
                        state.queues.unlink(&mut state.slab, id);
                        state.slab.remove(id);
                        state.total_weight = state.total_weight.saturating_sub(weight as u64);
                    }
                }
                WriteTask::ExpireReorder { id, deadline_nanos } => {
                    state.wheel.cancel(id);
                    if state.slab.contains(id) {
                        state.wheel.schedule(id, deadline_nanos);
                    }
                }
            }
        }
    }

    fn evict_to_capacity(&self, state: &mut MaintenanceState<K>) {
        let max_weight = self.shared.max_weight.load(Ordering::Relaxed);
        if max_weight == u64::MAX {
            return;
        }
        let window_max = self.shared.window_max.load(Ordering::Relaxed);

        let mut fresh_candidates: VecDeque<EntryId> = VecDeque::new();
        while state.queues.weight(QueueId::Window) > window_max {
            let head = match state.queues.head(QueueId::Window) {
                Some(h) => h,
                None => {
                    // Invariant 1 (§8): the region's tracked weight must
                    // match the sum of its members' weights. A head-less
                    // region reporting weight above target means the two
                    // have diverged -- a genuine structural invariant
                    // violation, not a benign empty-queue race (eviction
                    // only runs under the maintenance lock).
                    self.poison(format!(
                        "Window region weight {} exceeds target {} with no head entry",
                        state.queues.weight(QueueId::Window),
                        window_max
                    ));
                    break;
                }
            };
            state.queues.move_to_queue(&mut state.slab, head, QueueId::Probation);
            fresh_candidates.push_back(head);
        }

        let main_budget = max_weight.saturating_sub(window_max);
        while state.queues.weight(QueueId::Probation) + state.queues.weight(QueueId::Protected) > main_budget {
            let victim = match state.queues.head(QueueId::Probation).or_else(|| state.queues.head(QueueId::Protected))
            {
                Some(v) => v,
                None => {
                    self.poison(format!(
                        "Probation+Protected weight {} exceeds budget {} with no head entry",
                        state.queues.weight(QueueId::Probation) + state.queues.weight(QueueId::Protected),
                        main_budget
                    ));
                    break;
                }
            };
            let to_evict = match fresh_candidates.pop_front() {
                Some(candidate) if candidate != victim && state.slab.contains(candidate) => {
                    let candidate_hash = hash_key(&state.slab.get(candidate).unwrap().key);
                    let victim_hash = hash_key(&state.slab.get(victim).unwrap().key);
                    let fc = self.shared.sketch.frequency(candidate_hash);
                    let fv = self.shared.sketch.frequency(victim_hash);
                    if fc > fv {
                        victim
                    } else if fc <= 5 {
                        candidate
                    } else if (candidate_hash ^ victim_hash) & 1 == 0 {
                        victim
                    } else {
                        candidate
                    }
                }
                _ => victim,
            };
            self.evict_entry(state, to_evict, RemovalCause::Size);
        }
    }

    fn process_expirations(&self, state: &mut MaintenanceState<K>) {
        let now = self.shared.ticker.now_nanos();
        let due = state.wheel.advance_to(now);
        for id in due {
            if !state.slab.contains(id) {
                continue;
            }
            let key = state.slab.get(id).unwrap().key.clone();
            if let Some(handle) = self.shared.store.get(&key) {
                if handle.slab_id == id && self.is_expired(&handle, now) {
                    self.evict_entry(state, id, RemovalCause::Expired);
                }
            }
        }
    }

    fn evict_entry(&self, state: &mut MaintenanceState<K>, id: EntryId, cause: RemovalCause) {
        let (key, weight) = match state.slab.get(id) {
            Some(link) => (link.key.clone(), link.weight),
            None => return,
        };
        state.queues.unlink(&mut state.slab, id);
        state.slab.remove(id);
        state.total_weight = state.total_weight.saturating_sub(weight as u64);
        if let Some(handle) = self.shared.store.remove_if_slab_id(&key, id) {
            handle.mark_retired();
            if let Some(value) = handle.value.read().peek() {
                self.notify_removal(key, value, cause);
            }
        }
        if cause == RemovalCause::Size {
            self.shared.stats.record_eviction(weight as u64);
        }
    }

    /// Used by `Policy::{coldest,hottest}` and `Policy::set_maximum` to
    /// turn slab-indexed links into owned, live `(key, value)` pairs
    /// without exposing the maintenance lock past this call.
    pub(crate) fn resolve_snapshot(&self, state: &MaintenanceState<K>, ids: Vec<EntryId>, n: usize) -> Vec<(K, Arc<V>)> {
        let mut out = Vec::with_capacity(n.min(ids.len()));
        for id in ids.into_iter().take(n) {
            if let Some(link) = state.slab.get(id) {
                if let Some(handle) = self.shared.store.get(&link.key) {
                    if handle.slab_id == id {
                        if let Some(value) = handle.value.read().peek() {
                            out.push((link.key.clone(), value));
                        }
                    }
                }
            }
        }
        out
    }
}
