//! Quota-bounded on-disk cache of movie files.
//!
//! Blobs are written to a private staging directory while a transfer runs and
//! are only published into the index (and renamed into the storage directory)
//! on commit, so readers never observe a partially written file. When the
//! configured quota would be exceeded, the least recently accessed entries
//! that are not pinned by an active reader or fetch are evicted.

mod models;
mod reader;
mod store;

pub use models::{CacheEntry, CacheStats, CommitOutcome};
pub use reader::CacheReader;
pub use store::{CachePin, CacheStore, StagingHandle};

use thiserror::Error;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Insufficient cache space: {needed} bytes needed, quota is {quota} bytes")]
    InsufficientSpace { needed: u64, quota: u64 },

    #[error("Movie not resident in cache: {0}")]
    NotResident(String),

    #[error("Range starting at {start} not satisfiable for {size} bytes")]
    RangeNotSatisfiable { start: u64, size: u64 },

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
