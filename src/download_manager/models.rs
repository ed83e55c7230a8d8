//! Data models for the download orchestrator.

use serde::{Deserialize, Serialize};

/// Status of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed, // terminal
    Failed,    // terminal
    Cancelled, // terminal
}

impl DownloadStatus {
    /// Returns true if this is a terminal state (Completed, Failed or Cancelled).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "QUEUED",
            DownloadStatus::Downloading => "DOWNLOADING",
            DownloadStatus::Completed => "COMPLETED",
            DownloadStatus::Failed => "FAILED",
            DownloadStatus::Cancelled => "CANCELLED",
        }
    }
}

/// One fetch of a movie, shared by every caller that requested it while it
/// was active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: String,
    pub movie_id: String,
    pub status: DownloadStatus,
    /// Highest byte count reached by any attempt.
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    /// Unix timestamp (seconds).
    pub started_at: i64,
    pub completed_at: Option<i64>,
    /// Set only when `status` is `Failed`.
    pub last_error: Option<String>,
    /// Fetch attempts made so far.
    pub attempts: u32,
}

impl DownloadTask {
    pub fn new(movie_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            movie_id: movie_id.to_string(),
            status: DownloadStatus::Queued,
            bytes_downloaded: 0,
            total_bytes: None,
            started_at: chrono::Utc::now().timestamp(),
            completed_at: None,
            last_error: None,
            attempts: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
