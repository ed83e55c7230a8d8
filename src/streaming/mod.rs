//! Readiness gate and range-aware reads over the movie cache.

mod byte_range;
mod stream_server;

pub use byte_range::ByteRange;
pub use stream_server::{Availability, RangeStream, StreamInfo, StreamServer};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Movie {movie_id} is not ready for streaming ({})", .availability.as_str())]
    VideoNotReady {
        movie_id: String,
        availability: Availability,
    },

    #[error("Range starting at {start} not satisfiable for {size} bytes")]
    RangeNotSatisfiable { start: u64, size: u64 },

    #[error("Stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}
