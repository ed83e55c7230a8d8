use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio::io::Take;
use tokio_util::io::ReaderStream;

use super::store::CachePin;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Byte stream over a range of a resident blob.
///
/// Holds a pin on the entry until dropped, so the blob cannot be evicted
/// while a client is still being served.
pub struct CacheReader {
    movie_id: String,
    start: u64,
    end_inclusive: u64,
    total_size: u64,
    content_type: String,
    stream: ReaderStream<Take<File>>,
    _pin: CachePin,
}

impl CacheReader {
    pub(super) fn new(
        movie_id: String,
        start: u64,
        end_inclusive: u64,
        total_size: u64,
        content_type: String,
        file: Take<File>,
        pin: CachePin,
    ) -> Self {
        Self {
            movie_id,
            start,
            end_inclusive,
            total_size,
            content_type,
            stream: ReaderStream::with_capacity(file, READ_BUFFER_SIZE),
            _pin: pin,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end_inclusive(&self) -> u64 {
        self.end_inclusive
    }

    /// Number of bytes this reader yields.
    pub fn len(&self) -> u64 {
        self.end_inclusive - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Size of the whole blob.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Drains the stream into memory. Intended for small ranges and tests.
    pub async fn read_to_vec(mut self) -> std::io::Result<Vec<u8>> {
        use futures::StreamExt;

        let mut out = Vec::with_capacity(self.len() as usize);
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for CacheReader {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl std::fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader")
            .field("movie_id", &self.movie_id)
            .field("start", &self.start)
            .field("end_inclusive", &self.end_inclusive)
            .field("total_size", &self.total_size)
            .finish()
    }
}
