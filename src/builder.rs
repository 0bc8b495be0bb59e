//! `CacheBuilder`: the sole configuration surface (§6). Grounded on the
//! teacher's `cache::query_cache::CacheConfig` (a plain struct with a
//! `validate()` returning `DbError::Configuration`), generalized from a
//! fixed set of fields into a builder over user-supplied collaborator
//! traits (weigher, listener, writer, loader, executor, ticker).

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::cache::Cache;
use crate::error::{CacheError, Result};
use crate::executor::{default_executor, Executor};
use crate::stats::RemovalCause;

/// A user-supplied function from `(key, value)` to a non-negative weight.
/// Defaults to a constant weigher returning 1.
pub trait Weigher<K, V>: Send + Sync {
    fn weigh(&self, key: &K, value: &V) -> u32;
}

impl<K, V, F> Weigher<K, V> for F
where
    F: Fn(&K, &V) -> u32 + Send + Sync,
{
    fn weigh(&self, key: &K, value: &V) -> u32 {
        self(key, value)
    }
}

struct UnitWeigher;
impl<K, V> Weigher<K, V> for UnitWeigher {
    fn weigh(&self, _key: &K, _value: &V) -> u32 {
        1
    }
}

/// Notified, best-effort and fire-and-forget unless configured
/// synchronous, whenever a key→value mapping transitions from present to
/// absent.
pub trait RemovalListener<K, V>: Send + Sync {
    fn on_removal(&self, key: &K, value: &V, cause: RemovalCause);
}

impl<K, V, F> RemovalListener<K, V> for F
where
    F: Fn(&K, &V, RemovalCause) + Send + Sync,
{
    fn on_removal(&self, key: &K, value: &V, cause: RemovalCause) {
        self(key, value, cause)
    }
}

/// An optional write-through sink. A failure aborts the originating `put`
/// or `remove` and leaves the cache unchanged (§7).
pub trait CacheWriter<K, V>: Send + Sync {
    fn write(&self, key: &K, value: &V) -> std::result::Result<(), String>;
    fn delete(&self, key: &K) -> std::result::Result<(), String>;
}

/// An optional value loader backing `get(key, mappingFunction)`-style
/// loading caches and refresh-after-write.
pub trait Loader<K, V>: Send + Sync {
    fn load(&self, key: &K) -> std::result::Result<V, String>;
}

impl<K, V, F> Loader<K, V> for F
where
    F: Fn(&K) -> std::result::Result<V, String> + Send + Sync,
{
    fn load(&self, key: &K) -> std::result::Result<V, String> {
        self(key)
    }
}

/// A monotonic nanosecond time source. Calls must be cheap and
/// non-faulting (§5).
pub trait Ticker: Send + Sync {
    fn now_nanos(&self) -> u64;
}

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// The default ticker: `Instant`-based, monotonic for the lifetime of the
/// process.
pub struct SystemTicker;

impl Ticker for SystemTicker {
    fn now_nanos(&self) -> u64 {
        Instant::now().saturating_duration_since(*PROCESS_START).as_nanos() as u64
    }
}

/// How strongly the cache holds keys. Weak keys imply identity-based
/// equality in the Caffeine lineage this spec distills from; Rust has no
/// portable notion of identity-hashing an arbitrary `K`, so this field is
/// accepted and reported by `Cache::key_reference_strength()` but only
/// `ValueReferenceStrength` actually changes runtime behavior (see
/// DESIGN.md).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyReferenceStrength {
    Strong,
    Weak,
}

/// How strongly the cache holds values; wired directly into
/// `ValueHolder`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueReferenceStrength {
    Strong,
    Weak,
    Soft,
}

pub struct CacheBuilder<K, V> {
    pub(crate) maximum_weight: Option<u64>,
    pub(crate) initial_capacity: usize,
    pub(crate) weigher: Arc<dyn Weigher<K, V>>,
    pub(crate) expire_after_access: Option<Duration>,
    pub(crate) expire_after_write: Option<Duration>,
    pub(crate) refresh_after_write: Option<Duration>,
    pub(crate) key_reference_strength: KeyReferenceStrength,
    pub(crate) value_reference_strength: ValueReferenceStrength,
    pub(crate) removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    pub(crate) cache_writer: Option<Arc<dyn CacheWriter<K, V>>>,
    pub(crate) loader: Option<Arc<dyn Loader<K, V>>>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) statistics_enabled: bool,
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        CacheBuilder {
            maximum_weight: None,
            initial_capacity: 16,
            weigher: Arc::new(UnitWeigher),
            expire_after_access: None,
            expire_after_write: None,
            refresh_after_write: None,
            key_reference_strength: KeyReferenceStrength::Strong,
            value_reference_strength: ValueReferenceStrength::Strong,
            removal_listener: None,
            cache_writer: None,
            loader: None,
            executor: default_executor(),
            ticker: Arc::new(SystemTicker),
            statistics_enabled: true,
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maximum_weight(mut self, maximum: u64) -> Self {
        self.maximum_weight = Some(maximum);
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn weigher(mut self, weigher: impl Weigher<K, V> + 'static) -> Self {
        self.weigher = Arc::new(weigher);
        self
    }

    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        self.expire_after_access = Some(duration);
        self
    }

    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        self.expire_after_write = Some(duration);
        self
    }

    pub fn refresh_after_write(mut self, duration: Duration) -> Self {
        self.refresh_after_write = Some(duration);
        self
    }

    pub fn key_reference_strength(mut self, strength: KeyReferenceStrength) -> Self {
        self.key_reference_strength = strength;
        self
    }

    pub fn value_reference_strength(mut self, strength: ValueReferenceStrength) -> Self {
        self.value_reference_strength = strength;
        self
    }

    pub fn removal_listener(mut self, listener: impl RemovalListener<K, V> + 'static) -> Self {
        self.removal_listener = Some(Arc::new(listener));
        self
    }

    pub fn cache_writer(mut self, writer: impl CacheWriter<K, V> + 'static) -> Self {
        self.cache_writer = Some(Arc::new(writer));
        self
    }

    pub fn loader(mut self, loader: impl Loader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn statistics_enabled(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(d) = self.refresh_after_write {
            if d.is_zero() {
                return Err(CacheError::InvalidConfiguration(
                    "refreshAfterWrite must be a positive duration".into(),
                ));
            }
            if self.loader.is_none() {
                return Err(CacheError::InvalidConfiguration(
                    "refreshAfterWrite requires a loader".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn build(self) -> Result<Cache<K, V>> {
        self.validate()?;
        Ok(Cache::new(self))
    }
}
