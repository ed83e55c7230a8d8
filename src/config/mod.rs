mod file_config;

pub use file_config::{DownloadsConfig, FileConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub catalog_db: Option<PathBuf>,
    pub storage_path: Option<PathBuf>,
    pub staging_path: Option<PathBuf>,
    pub max_cache_size: Option<String>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub remote_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub catalog_db: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub cache: CacheSettings,
    pub downloads: DownloadSettings,
    pub remote: RemoteSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub storage_path: PathBuf,
    /// Must live on the same filesystem as `storage_path` so that publishing
    /// a staged blob is a rename.
    pub staging_path: PathBuf,
    pub max_size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub worker_concurrency: usize,
    pub chunk_size_bytes: u64,
    pub progress_throttle_ms: u64,
    pub stall_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl DownloadSettings {
    pub fn progress_throttle(&self) -> Duration {
        Duration::from_millis(self.progress_throttle_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            chunk_size_bytes: 1024 * 1024,
            progress_throttle_ms: 250,
            stall_timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

pub const DEFAULT_MAX_CACHE_SIZE: &str = "50 GiB";

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let catalog_db = file
            .catalog_db
            .map(PathBuf::from)
            .or_else(|| cli.catalog_db.clone())
            .ok_or_else(|| {
                anyhow!("catalog_db must be specified via --catalog-db or in config file")
            })?;

        let storage_path = file
            .storage_path
            .map(PathBuf::from)
            .or_else(|| cli.storage_path.clone())
            .ok_or_else(|| {
                anyhow!("storage_path must be specified via --storage-path or in config file")
            })?;
        if storage_path.exists() && !storage_path.is_dir() {
            bail!("storage_path is not a directory: {:?}", storage_path);
        }

        let staging_path = file
            .staging_path
            .map(PathBuf::from)
            .or_else(|| cli.staging_path.clone())
            .unwrap_or_else(|| storage_path.join(".staging"));
        if staging_path == storage_path {
            bail!(
                "staging_path must differ from storage_path: {:?}",
                storage_path
            );
        }

        let max_cache_size = file
            .max_cache_size
            .or_else(|| cli.max_cache_size.clone())
            .unwrap_or_else(|| DEFAULT_MAX_CACHE_SIZE.to_string());
        let max_size_bytes = parse_size(&max_cache_size)
            .with_context(|| format!("Invalid max_cache_size: {}", max_cache_size))?;
        if max_size_bytes == 0 {
            bail!("max_cache_size must be greater than zero");
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let base_url = file
            .remote_url
            .or_else(|| cli.remote_url.clone())
            .ok_or_else(|| {
                anyhow!("remote_url must be specified via --remote-url or in config file")
            })?;
        let remote = RemoteSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: file.remote_token.or_else(|| cli.remote_token.clone()),
            timeout_secs: file.remote_timeout_sec.unwrap_or(cli.remote_timeout_sec),
        };

        // Download settings - merge file config with defaults
        let defaults = DownloadSettings::default();
        let dl_file = file.downloads.unwrap_or_default();
        let chunk_size_bytes = match dl_file.chunk_size {
            Some(s) => parse_size(&s).with_context(|| format!("Invalid chunk_size: {}", s))?,
            None => defaults.chunk_size_bytes,
        };
        let downloads = DownloadSettings {
            worker_concurrency: dl_file
                .worker_concurrency
                .unwrap_or(defaults.worker_concurrency),
            chunk_size_bytes,
            progress_throttle_ms: dl_file
                .progress_throttle_ms
                .unwrap_or(defaults.progress_throttle_ms),
            stall_timeout_secs: dl_file
                .stall_timeout_secs
                .unwrap_or(defaults.stall_timeout_secs),
            max_retries: dl_file.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff_ms: dl_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: dl_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: dl_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
        };
        if downloads.worker_concurrency == 0 {
            bail!("downloads.worker_concurrency must be at least 1");
        }
        if downloads.chunk_size_bytes == 0 {
            bail!("downloads.chunk_size must be greater than zero");
        }

        Ok(Self {
            catalog_db,
            port,
            metrics_port,
            logging_level,
            cache: CacheSettings {
                storage_path,
                staging_path,
                max_size_bytes,
            },
            downloads,
            remote,
        })
    }
}

/// Parses a human readable size ("50 GiB", "512 KiB", "1048576").
pub fn parse_size(s: &str) -> Result<u64> {
    let byte = byte_unit::Byte::parse_str(s.trim(), true).map_err(|e| anyhow!("{}", e))?;
    Ok(byte.as_u64())
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_cli(storage: &TempDir) -> CliConfig {
        CliConfig {
            catalog_db: Some(storage.path().join("catalog.db")),
            storage_path: Some(storage.path().to_path_buf()),
            port: 3001,
            metrics_port: 9091,
            remote_url: Some("https://cloud.example.com/files/".to_string()),
            remote_timeout_sec: 300,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1048576").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1 MiB").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("2GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = make_cli(&temp_dir);

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.catalog_db, temp_dir.path().join("catalog.db"));
        assert_eq!(config.cache.storage_path, temp_dir.path());
        assert_eq!(config.cache.staging_path, temp_dir.path().join(".staging"));
        assert_eq!(
            config.cache.max_size_bytes,
            parse_size(DEFAULT_MAX_CACHE_SIZE).unwrap()
        );
        assert_eq!(config.port, 3001);
        assert_eq!(config.remote.base_url, "https://cloud.example.com/files");
        assert_eq!(config.downloads.worker_concurrency, 2);
        assert_eq!(config.downloads.chunk_size_bytes, 1024 * 1024);
        assert_eq!(config.downloads.progress_throttle_ms, 250);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            max_cache_size: Some("1 GiB".to_string()),
            ..make_cli(&temp_dir)
        };
        let file_config = FileConfig {
            port: Some(4000),
            max_cache_size: Some("2 GiB".to_string()),
            logging_level: Some("headers".to_string()),
            downloads: Some(DownloadsConfig {
                worker_concurrency: Some(5),
                chunk_size: Some("64 KiB".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.cache.max_size_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.downloads.worker_concurrency, 5);
        assert_eq!(config.downloads.chunk_size_bytes, 64 * 1024);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.downloads.max_retries, 3);
    }

    #[test]
    fn test_resolve_rejects_staging_equal_to_storage() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            staging_path: Some(temp_dir.path().to_path_buf()),
            ..make_cli(&temp_dir)
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("staging_path must differ from storage_path"));
    }

    #[test]
    fn test_resolve_missing_remote_url_error() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            remote_url: None,
            ..make_cli(&temp_dir)
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("remote_url must be specified"));
    }

    #[test]
    fn test_resolve_missing_storage_path_error() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            storage_path: None,
            ..make_cli(&temp_dir)
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("storage_path must be specified"));
    }

    #[test]
    fn test_resolve_storage_path_not_directory_error() {
        let temp_dir = TempDir::new().unwrap();
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            storage_path: Some(temp_file.path().to_path_buf()),
            ..make_cli(&temp_dir)
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_resolve_rejects_zero_workers() {
        let temp_dir = TempDir::new().unwrap();
        let file_config = FileConfig {
            downloads: Some(DownloadsConfig {
                worker_concurrency: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&make_cli(&temp_dir), Some(file_config)).is_err());
    }
}
