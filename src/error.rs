use thiserror::Error;

/// Errors surfaced by the cache's public, fallible operations.
///
/// `get_if_present` never returns a `Result`: it has no user callback that
/// can fail. `put`, `invalidate`, and the other mutating operations do
/// return `Result`, since a panicking weigher or a rejecting `CacheWriter`
/// must be surfaced to the caller rather than silently swallowed (see
/// DESIGN.md's Open Question decision on this). This type also covers
/// configuration mistakes caught at build time.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    #[error("loader failed: {0}")]
    LoaderFailed(String),

    #[error("cache writer rejected the operation: {0}")]
    WriterFailed(String),

    #[error("weigher panicked: {0}")]
    WeigherFailed(String),

    #[error("cache invalidated after an internal invariant violation: {0}")]
    Invalidated(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
