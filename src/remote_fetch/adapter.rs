use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{TransferClient, TransferError};
use crate::catalog_store::RemoteReference;

pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed { total_bytes: u64 },
    Cancelled,
}

/// Streams a remote file into a local sink, reporting progress per chunk.
#[derive(Clone)]
pub struct RemoteFetchAdapter {
    client: Arc<dyn TransferClient>,
    chunk_size: u64,
    stall_timeout: Duration,
}

impl RemoteFetchAdapter {
    pub fn new(client: Arc<dyn TransferClient>, chunk_size: u64, stall_timeout: Duration) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
            stall_timeout,
        }
    }

    /// Writes the remote bytes sequentially into `sink`.
    ///
    /// `on_progress(bytes_so_far, total_bytes)` is invoked whenever the byte
    /// count crosses a multiple of `chunk_size` and once more when the body
    /// is complete.
    /// If no bytes arrive for `stall_timeout` the fetch fails with a
    /// `Timeout` error. Cancellation is observed between stream items.
    pub async fn fetch(
        &self,
        reference: &RemoteReference,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<FetchOutcome, TransferError> {
        let transfer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(FetchOutcome::Cancelled),
            opened = self.client.open(reference) => opened?,
        };

        let total_bytes = transfer.total_bytes.or(reference.size_hint);
        let mut stream = transfer.stream;
        let mut received: u64 = 0;
        let mut next_report = self.chunk_size;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Fetch of {} cancelled after {} bytes", reference.location, received);
                    return Ok(FetchOutcome::Cancelled);
                }
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    return Err(TransferError::timeout(format!(
                        "no data received for {:?} after {} bytes",
                        self.stall_timeout,
                        received
                    )))
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };

            sink.write_all(&chunk)
                .await
                .map_err(|e| TransferError::storage(format!("write failed: {}", e)))?;

            received += chunk.len() as u64;
            if received >= next_report {
                // Thresholds stay on chunk boundaries whatever the piece sizes.
                next_report = (received / self.chunk_size + 1) * self.chunk_size;
                on_progress(received, total_bytes);
            }
        }

        sink.flush()
            .await
            .map_err(|e| TransferError::storage(format!("flush failed: {}", e)))?;

        if let Some(expected) = transfer.total_bytes {
            if received != expected {
                return Err(TransferError::network(format!(
                    "body ended after {} of {} bytes",
                    received, expected
                )));
            }
        }

        on_progress(received, Some(received));
        Ok(FetchOutcome::Completed {
            total_bytes: received,
        })
    }
}
