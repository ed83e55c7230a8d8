use axum::extract::FromRef;

use crate::cache_store::CacheStore;
use crate::catalog_store::CatalogStore;
use crate::download_manager::DownloadOrchestrator;
use crate::notifications::BroadcastChannel;
use crate::streaming::StreamServer;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type GuardedCacheStore = Arc<CacheStore>;
pub type GuardedBroadcastChannel = Arc<BroadcastChannel>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub catalog_store: GuardedCatalogStore,
    pub cache_store: GuardedCacheStore,
    pub orchestrator: DownloadOrchestrator,
    pub stream_server: StreamServer,
    pub events: GuardedBroadcastChannel,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for GuardedCacheStore {
    fn from_ref(input: &ServerState) -> Self {
        input.cache_store.clone()
    }
}

impl FromRef<ServerState> for DownloadOrchestrator {
    fn from_ref(input: &ServerState) -> Self {
        input.orchestrator.clone()
    }
}

impl FromRef<ServerState> for StreamServer {
    fn from_ref(input: &ServerState) -> Self {
        input.stream_server.clone()
    }
}

impl FromRef<ServerState> for GuardedBroadcastChannel {
    fn from_ref(input: &ServerState) -> Self {
        input.events.clone()
    }
}
