//! Test harness lifecycle management
//!
//! Each test gets an isolated cache directory, an in-memory catalog with the
//! test movies and a full orchestrator/stream server/router stack on top of
//! a `ScriptedTransferClient`.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use movie_vault::cache_store::CacheStore;
use movie_vault::catalog_store::{CatalogStore, InMemoryCatalogStore, Movie};
use movie_vault::config::{CacheSettings, DownloadSettings};
use movie_vault::download_manager::{
    DownloadOrchestrator, DownloadStatus, DownloadTask, RetryPolicy,
};
use movie_vault::notifications::{BroadcastChannel, ProgressEvent, ProgressPublisher, TopicMessage};
use movie_vault::remote_fetch::RemoteFetchAdapter;
use movie_vault::server::{make_app, ServerConfig, ServerState};
use movie_vault::streaming::StreamServer;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tower::ServiceExt;

use super::constants::*;
use super::transfer::ScriptedTransferClient;

pub struct HarnessOptions {
    pub worker_concurrency: usize,
    pub max_cache_size: u64,
    pub max_retries: u32,
    pub progress_throttle: Duration,
    pub stall_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            max_cache_size: 8 * MOVIE_SIZE_BYTES as u64,
            max_retries: 3,
            progress_throttle: Duration::ZERO,
            stall_timeout: Duration::from_secs(60),
        }
    }
}

pub struct TestHarness {
    pub catalog: Arc<InMemoryCatalogStore>,
    pub cache: Arc<CacheStore>,
    pub client: Arc<ScriptedTransferClient>,
    pub orchestrator: DownloadOrchestrator,
    pub stream_server: StreamServer,
    pub events: Arc<BroadcastChannel>,
    pub state: ServerState,

    // Keeps the cache directory alive until drop
    _temp_dir: TempDir,
}

impl TestHarness {
    pub async fn spawn() -> Self {
        Self::spawn_with(HarnessOptions::default()).await
    }

    pub async fn spawn_with(options: HarnessOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let cache = Arc::new(
            CacheStore::open(&CacheSettings {
                storage_path: temp_dir.path().join("cache"),
                staging_path: temp_dir.path().join("staging"),
                max_size_bytes: options.max_cache_size,
            })
            .await
            .expect("Failed to open cache store"),
        );

        let catalog = Arc::new(InMemoryCatalogStore::with_movies(ALL_MOVIE_IDS.map(|id| {
            Movie::new(id, &format!("Movie {}", id), &remote_location(id))
                .with_category("test")
                .with_size_hint(MOVIE_SIZE_BYTES as u64)
        })));
        let client = Arc::new(ScriptedTransferClient::new(ALL_MOVIE_IDS));

        let events = Arc::new(BroadcastChannel::default());
        let publisher = Arc::new(ProgressPublisher::new(
            events.clone(),
            options.progress_throttle,
        ));

        let settings = DownloadSettings {
            worker_concurrency: options.worker_concurrency,
            chunk_size_bytes: TEST_CHUNK_SIZE as u64,
            max_retries: options.max_retries,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            ..Default::default()
        };
        let fetcher = RemoteFetchAdapter::new(
            client.clone(),
            settings.chunk_size_bytes,
            options.stall_timeout,
        );
        let catalog_store: Arc<dyn CatalogStore> = catalog.clone();
        let orchestrator = DownloadOrchestrator::new(
            cache.clone(),
            fetcher,
            catalog_store.clone(),
            publisher,
            settings.worker_concurrency,
            RetryPolicy::new(&settings),
        );
        let stream_server = StreamServer::new(cache.clone(), orchestrator.clone());

        let state = ServerState::new(
            ServerConfig::default(),
            catalog_store,
            cache.clone(),
            orchestrator.clone(),
            stream_server.clone(),
            events.clone(),
        );

        Self {
            catalog,
            cache,
            client,
            orchestrator,
            stream_server,
            events,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn app(&self) -> Router {
        make_app(self.state.clone())
    }

    /// Requests a download and waits for its terminal state.
    pub async fn download(&self, movie_id: &str) -> DownloadTask {
        self.orchestrator.request_download(movie_id);
        tokio::time::timeout(
            Duration::from_secs(10),
            self.orchestrator.wait_for_terminal(movie_id),
        )
        .await
        .expect("Download did not finish in time")
        .expect("Movie was never requested")
    }

    /// Polls until the movie's current task reaches `status`.
    pub async fn wait_for_status(&self, movie_id: &str, status: DownloadStatus) -> DownloadTask {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(task) = self.orchestrator.get_progress(movie_id) {
                    if task.status == status {
                        return task;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Task did not reach the expected status in time")
    }

    /// Sends a request through the router.
    pub async fn request(&self, method: &str, uri: &str, range: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(range) = range {
            builder = builder.header("Range", range);
        }
        self.app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request("GET", uri, None).await
    }
}

/// Drains everything already published on `topic`.
pub fn drain_events(rx: &mut broadcast::Receiver<TopicMessage>, topic: &str) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if message.topic == topic {
            events.push(message.event);
        }
    }
    events
}

/// Reads a whole response body.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
