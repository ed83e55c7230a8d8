//! Download orchestration.
//!
//! Owns the per-movie task state machine: at most one active fetch per movie,
//! a bounded pool of concurrent fetches, retries for transient failures and
//! cooperative cancellation.

mod models;
mod orchestrator;
mod retry_policy;

pub use models::{DownloadStatus, DownloadTask};
pub use orchestrator::DownloadOrchestrator;
pub use retry_policy::RetryPolicy;

use thiserror::Error;

use crate::cache_store::CacheError;
use crate::remote_fetch::TransferError;

/// Errors that end a fetch attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Catalog error: {0}")]
    Catalog(anyhow::Error),
}

impl DownloadError {
    /// Only transient transfer errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloadError::Transfer(e) if e.is_transient())
    }
}
