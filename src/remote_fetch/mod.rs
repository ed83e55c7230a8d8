//! Uniform contract for pulling a movie's bytes from the remote store.

mod adapter;
mod error;
mod http_client;

pub use adapter::{FetchOutcome, RemoteFetchAdapter};
pub use error::{TransferError, TransferErrorKind};
pub use http_client::HttpTransferClient;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::catalog_store::RemoteReference;

/// An opened transfer: the announced size (if any) and the body stream.
pub struct RemoteTransfer {
    pub total_bytes: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, TransferError>>,
}

/// Performs the actual authenticated download against a remote store.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn open(&self, reference: &RemoteReference) -> Result<RemoteTransfer, TransferError>;
}
