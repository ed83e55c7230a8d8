use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use movie_vault::cache_store::CacheStore;
use movie_vault::catalog_store::{CatalogStore, SqliteCatalogStore};
use movie_vault::config::{AppConfig, CliConfig, FileConfig};
use movie_vault::download_manager::{DownloadOrchestrator, RetryPolicy};
use movie_vault::notifications::{BroadcastChannel, ProgressPublisher};
use movie_vault::remote_fetch::{HttpTransferClient, RemoteFetchAdapter};
use movie_vault::server::{self, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use movie_vault::streaming::StreamServer;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite catalog database file.
    #[clap(long, value_parser = parse_path)]
    pub catalog_db: Option<PathBuf>,

    /// Directory holding cached movie files.
    #[clap(long, value_parser = parse_path)]
    pub storage_path: Option<PathBuf>,

    /// Directory for in-progress downloads. Defaults to `<storage_path>/.staging`.
    #[clap(long, value_parser = parse_path)]
    pub staging_path: Option<PathBuf>,

    /// Disk quota for the cache, e.g. "50 GiB".
    #[clap(long)]
    pub max_cache_size: Option<String>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the remote store movies are fetched from.
    #[clap(long)]
    pub remote_url: Option<String>,

    /// Bearer token sent to the remote store.
    #[clap(long)]
    pub remote_token: Option<String>,

    /// Timeout in seconds for connecting to and reading from the remote store.
    #[clap(long, default_value_t = 300)]
    pub remote_timeout_sec: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            catalog_db: self.catalog_db.clone(),
            storage_path: self.storage_path.clone(),
            staging_path: self.staging_path.clone(),
            max_cache_size: self.max_cache_size.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            remote_url: self.remote_url.clone(),
            remote_token: self.remote_token.clone(),
            remote_timeout_sec: self.remote_timeout_sec,
        }
    }
}

/// Brings the catalog's cached flags in line with what is actually on disk.
fn reconcile_catalog(catalog: &dyn CatalogStore, cache: &CacheStore) -> Result<()> {
    let mut fixed = 0;
    for movie in catalog.list_movies()? {
        match cache.entry(&movie.id) {
            Some(entry) if !movie.cached || movie.file_size != Some(entry.size_bytes) => {
                catalog.set_movie_cached(&movie.id, entry.size_bytes)?;
                fixed += 1;
            }
            None if movie.cached => {
                catalog.set_movie_uncached(&movie.id)?;
                fixed += 1;
            }
            _ => {}
        }
    }
    if fixed > 0 {
        info!("Reconciled cache status of {} movies", fixed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    info!("Opening SQLite catalog database at {:?}...", config.catalog_db);
    let catalog_store: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalogStore::new(&config.catalog_db)?);

    info!(
        "Opening cache at {:?} with quota of {} bytes...",
        config.cache.storage_path, config.cache.max_size_bytes
    );
    let cache_store = Arc::new(
        CacheStore::open(&config.cache)
            .await
            .context("Failed to open cache store")?,
    );
    if let Err(e) = reconcile_catalog(catalog_store.as_ref(), &cache_store) {
        warn!("Failed to reconcile catalog with cache: {:#}", e);
    }

    info!("Remote store at {}", config.remote.base_url);
    let transfer_client = Arc::new(HttpTransferClient::new(&config.remote)?);
    let fetcher = RemoteFetchAdapter::new(
        transfer_client,
        config.downloads.chunk_size_bytes,
        config.downloads.stall_timeout(),
    );

    let events = Arc::new(BroadcastChannel::default());
    let publisher = Arc::new(ProgressPublisher::new(
        events.clone(),
        config.downloads.progress_throttle(),
    ));

    let orchestrator = DownloadOrchestrator::new(
        cache_store.clone(),
        fetcher,
        catalog_store.clone(),
        publisher,
        config.downloads.worker_concurrency,
        RetryPolicy::new(&config.downloads),
    );
    let stream_server = StreamServer::new(cache_store.clone(), orchestrator.clone());

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
        ..Default::default()
    };
    let state = ServerState::new(
        server_config,
        catalog_store,
        cache_store,
        orchestrator.clone(),
        stream_server,
        events,
    );

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested, cancelling downloads...");
        signal_shutdown.cancel();
    });

    let result = run_server(state, shutdown).await;
    orchestrator.cancel_all();
    result
}
