use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A resident cache entry. Only fully written blobs are ever indexed.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub movie_id: String,
    pub size_bytes: u64,
    pub last_accessed_at: DateTime<Utc>,
    pub storage_path: PathBuf,
    /// MIME type sniffed from the blob header.
    pub content_type: String,
    /// Always true for indexed entries.
    pub resident: bool,
    /// Monotonic access counter used to break ties between equal timestamps.
    #[serde(skip)]
    pub(crate) access_seq: u64,
}

/// Snapshot of cache accounting.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub used_bytes: u64,
    pub reserved_bytes: u64,
    pub max_size_bytes: u64,
    pub entries: usize,
}

/// Result of publishing a staged blob.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub entry: CacheEntry,
    /// Other movies evicted to make room for this one.
    pub evicted: Vec<String>,
}
