use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::IntoFuture;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{
    download_routes::make_download_routes, log_requests, metrics, state::*,
    stream_routes::make_stream_routes, ServerConfig,
};
use crate::cache_store::CacheStats;
use crate::catalog_store::Movie;
use crate::streaming::Availability;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub cache: CacheStats,
    pub active_downloads: usize,
}

#[derive(Serialize)]
struct MovieResponse {
    #[serde(flatten)]
    pub movie: Movie,
    pub availability: Availability,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        cache: state.cache_store.stats(),
        active_downloads: state.orchestrator.list_active().len(),
    };
    Json(stats)
}

async fn list_movies(State(state): State<ServerState>) -> Response {
    match state.catalog_store.list_movies() {
        Ok(movies) => {
            let movies: Vec<MovieResponse> = movies
                .into_iter()
                .map(|movie| MovieResponse {
                    availability: state.stream_server.availability(&movie.id),
                    movie,
                })
                .collect();
            Json(movies).into_response()
        }
        Err(e) => {
            error!("Failed to list movies: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_movie(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    match state.catalog_store.get_movie(&id) {
        Ok(Some(movie)) => Json(MovieResponse {
            availability: state.stream_server.availability(&movie.id),
            movie,
        })
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to get movie {}: {:#}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let movie_routes: Router = Router::new()
        .route("/", get(list_movies))
        .route("/{id}", get(get_movie))
        .with_state(state.clone());

    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    home_router
        .nest("/v1/movies", movie_routes)
        .nest("/v1/downloads", make_download_routes(state.clone()))
        .nest("/v1/stream", make_stream_routes(state.clone()))
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        catalog_store: GuardedCatalogStore,
        cache_store: GuardedCacheStore,
        orchestrator: crate::download_manager::DownloadOrchestrator,
        stream_server: crate::streaming::StreamServer,
        events: GuardedBroadcastChannel,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            catalog_store,
            cache_store,
            orchestrator,
            stream_server,
            events,
        }
    }
}

/// Serves the API and the metrics endpoint until `shutdown` is cancelled.
pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let api_shutdown = shutdown.clone();
    let metrics_shutdown = shutdown.clone();
    let api = axum::serve(listener, app)
        .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
        .into_future();
    let metrics_server = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
        .into_future();

    tokio::try_join!(api, metrics_server)?;
    Ok(())
}
