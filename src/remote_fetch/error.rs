use serde::Serialize;
use std::fmt;

/// Classification of transfer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferErrorKind {
    /// Connection failures, resets, server-side errors.
    Network,
    /// No bytes received within the stall timeout, or the request timed out.
    Timeout,
    /// Credentials rejected by the remote store.
    Auth,
    /// Remote account quota or rate limit exceeded.
    Quota,
    /// The remote file does not exist.
    NotFound,
    /// Writing to the local sink failed.
    Storage,
}

impl TransferErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferErrorKind::Network => "NETWORK",
            TransferErrorKind::Timeout => "TIMEOUT",
            TransferErrorKind::Auth => "AUTH",
            TransferErrorKind::Quota => "QUOTA",
            TransferErrorKind::NotFound => "NOT_FOUND",
            TransferErrorKind::Storage => "STORAGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Timeout, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Storage, message)
    }

    /// Whether a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransferErrorKind::Network | TransferErrorKind::Timeout
        )
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for TransferError {}
