//! Movie Vault Library
//!
//! On-demand acquisition, caching and streaming of movie files. The modules
//! are exposed for the server binary and for integration tests.

pub mod cache_store;
pub mod catalog_store;
pub mod config;
pub mod download_manager;
pub mod notifications;
pub mod remote_fetch;
pub mod server;
pub mod streaming;

// Re-export commonly used types for convenience
pub use cache_store::CacheStore;
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use download_manager::DownloadOrchestrator;
pub use server::{run_server, RequestsLoggingLevel};
pub use streaming::StreamServer;
