use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub catalog_db: Option<String>,
    pub storage_path: Option<String>,
    pub staging_path: Option<String>,
    /// Human readable, e.g. "50 GiB".
    pub max_cache_size: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub remote_timeout_sec: Option<u64>,

    // Feature configs
    pub downloads: Option<DownloadsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DownloadsConfig {
    pub worker_concurrency: Option<usize>,
    /// Human readable, e.g. "1 MiB".
    pub chunk_size: Option<String>,
    pub progress_throttle_ms: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
