use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::StreamError;
use crate::cache_store::{CacheError, CacheReader, CacheStore};
use crate::download_manager::DownloadOrchestrator;

/// Byte stream returned by [`StreamServer::read_range`].
pub type RangeStream = CacheReader;

/// A movie's availability as seen by streaming clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    /// Not cached and no download in progress.
    Unavailable,
    /// A download is queued or running.
    Pending,
    /// Fully cached and readable.
    Available,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Unavailable => "UNAVAILABLE",
            Availability::Pending => "PENDING",
            Availability::Available => "AVAILABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub movie_id: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub accepts_ranges: bool,
}

/// Gates reads on cache residency and serves byte ranges.
#[derive(Clone)]
pub struct StreamServer {
    cache: Arc<CacheStore>,
    orchestrator: DownloadOrchestrator,
}

impl StreamServer {
    pub fn new(cache: Arc<CacheStore>, orchestrator: DownloadOrchestrator) -> Self {
        Self {
            cache,
            orchestrator,
        }
    }

    pub fn availability(&self, movie_id: &str) -> Availability {
        if self.cache.is_resident(movie_id) {
            Availability::Available
        } else if self.orchestrator.is_active(movie_id) {
            Availability::Pending
        } else {
            Availability::Unavailable
        }
    }

    pub fn get_stream_info(&self, movie_id: &str) -> Result<StreamInfo, StreamError> {
        match self.cache.entry(movie_id) {
            Some(entry) => Ok(StreamInfo {
                movie_id: entry.movie_id,
                size_bytes: entry.size_bytes,
                content_type: entry.content_type,
                accepts_ranges: true,
            }),
            None => Err(self.not_ready(movie_id)),
        }
    }

    /// Opens `start..=end` of a resident movie. `end` defaults to the last
    /// byte. The entry stays pinned against eviction until the returned
    /// stream is dropped.
    pub async fn read_range(
        &self,
        movie_id: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<RangeStream, StreamError> {
        debug!("Reading {} bytes {}-{:?}", movie_id, start, end);
        self.cache
            .read(movie_id, start, end)
            .await
            .map_err(|e| match e {
                CacheError::NotResident(_) => self.not_ready(movie_id),
                CacheError::RangeNotSatisfiable { start, size } => {
                    StreamError::RangeNotSatisfiable { start, size }
                }
                CacheError::Io(e) => StreamError::Io(e),
                CacheError::InsufficientSpace { needed, quota } => StreamError::Io(
                    std::io::Error::other(format!(
                        "insufficient cache space: {} bytes needed, quota is {}",
                        needed, quota
                    )),
                ),
            })
    }

    fn not_ready(&self, movie_id: &str) -> StreamError {
        StreamError::VideoNotReady {
            movie_id: movie_id.to_string(),
            availability: self.availability(movie_id),
        }
    }
}
