//! HTTP transfer client for the remote cloud store.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{RemoteTransfer, TransferClient, TransferError, TransferErrorKind};
use crate::catalog_store::RemoteReference;
use crate::config::RemoteSettings;

/// Downloads files with `GET {base_url}/{location}`.
#[derive(Clone)]
pub struct HttpTransferClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpTransferClient {
    /// Create a new client.
    ///
    /// The timeout applies to connecting and receiving response headers; the
    /// body is governed by the fetch adapter's stall timeout.
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.timeout_secs))
            .read_timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth_token: settings.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, location: &str) -> String {
        let path = location
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    async fn open(&self, reference: &RemoteReference) -> Result<RemoteTransfer, TransferError> {
        let url = self.url_for(&reference.location);
        debug!("Opening remote transfer {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::new(
                classify_status(status),
                format!("GET {} returned {}", url, status),
            ));
        }

        let total_bytes = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(map_reqwest_error))
            .boxed();

        Ok(RemoteTransfer {
            total_bytes,
            stream,
        })
    }
}

fn classify_status(status: StatusCode) -> TransferErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransferErrorKind::Auth,
        StatusCode::NOT_FOUND | StatusCode::GONE => TransferErrorKind::NotFound,
        StatusCode::PAYMENT_REQUIRED
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INSUFFICIENT_STORAGE => TransferErrorKind::Quota,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransferErrorKind::Timeout,
        _ => TransferErrorKind::Network,
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::timeout(e.to_string())
    } else {
        TransferError::network(e.to_string())
    }
}
