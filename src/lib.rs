// Bounded, concurrent, in-process cache built on Window-TinyLFU admission
// and a segmented Window/Probation/Protected replacement policy.

mod builder;
mod buffers;
mod cache;
mod entry;
mod error;
mod executor;
mod expiry;
mod notify;
mod policy;
mod queues;
mod sketch;
mod slab;
mod stats;
mod store;

pub use builder::{
    CacheBuilder, CacheWriter, KeyReferenceStrength, Loader, RemovalListener, SystemTicker, Ticker,
    ValueReferenceStrength, Weigher,
};
pub use cache::Cache;
pub use error::{CacheError, Result};
pub use executor::{Executor, InlineExecutor, ThreadSpawnExecutor};
pub use policy::Policy;
pub use stats::{CacheStatistics, RemovalCause};
