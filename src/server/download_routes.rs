//! Download HTTP routes.
//!
//! Provides endpoints for:
//! - Requesting and cancelling a movie download
//! - Querying a movie's last-known download task
//! - Listing active downloads
//! - Subscribing to live progress events over WebSocket

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{debug, error};

use crate::download_manager::DownloadOrchestrator;
use crate::server::events::events_handler;
use crate::server::state::{GuardedCatalogStore, ServerState};

/// POST /{movie_id} - Start or join the download of a movie
async fn request_download(
    State(catalog): State<GuardedCatalogStore>,
    State(orchestrator): State<DownloadOrchestrator>,
    Path(movie_id): Path<String>,
) -> Response {
    match catalog.get_movie(&movie_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to look up movie {}: {:#}", movie_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let task = orchestrator.request_download(&movie_id);
    debug!("Download requested for {}: task {} {:?}", movie_id, task.id, task.status);
    (StatusCode::ACCEPTED, Json(task)).into_response()
}

/// DELETE /{movie_id} - Cancel a movie's active download
async fn cancel_download(
    State(orchestrator): State<DownloadOrchestrator>,
    Path(movie_id): Path<String>,
) -> Response {
    match orchestrator.cancel(&movie_id) {
        Some(task) => Json(task).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /{movie_id} - Last-known download task for a movie
async fn get_download(
    State(orchestrator): State<DownloadOrchestrator>,
    Path(movie_id): Path<String>,
) -> Response {
    match orchestrator.get_progress(&movie_id) {
        Some(task) => Json(task).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET / - Queued and running downloads
async fn list_active_downloads(State(orchestrator): State<DownloadOrchestrator>) -> Response {
    Json(orchestrator.list_active()).into_response()
}

pub fn make_download_routes(state: ServerState) -> Router {
    Router::new()
        .route("/", get(list_active_downloads))
        .route("/events", get(events_handler))
        .route(
            "/{movie_id}",
            get(get_download)
                .post(request_download)
                .delete(cancel_download),
        )
        .with_state(state)
}
