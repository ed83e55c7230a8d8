use serde::{Deserialize, Serialize};

use crate::download_manager::{DownloadStatus, DownloadTask};

/// Combined topic receiving every movie's events.
pub const DOWNLOADS_TOPIC: &str = "downloads";

/// Per-movie topic name.
pub fn movie_topic(movie_id: &str) -> String {
    format!("{}/{}", DOWNLOADS_TOPIC, movie_id)
}

/// Snapshot of a download task at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub movie_id: String,
    pub task_id: String,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub status: DownloadStatus,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl ProgressEvent {
    pub fn from_task(task: &DownloadTask) -> Self {
        Self {
            movie_id: task.movie_id.clone(),
            task_id: task.id.clone(),
            bytes_downloaded: task.bytes_downloaded,
            total_bytes: task.total_bytes,
            status: task.status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
