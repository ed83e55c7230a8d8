//! Movie streaming routes

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, error};

use super::state::ServerState;
use super::ServerConfig;
use crate::streaming::{Availability, ByteRange, StreamError, StreamServer};

const HEADER_BYTE_RANGE: &str = "Range";

#[derive(Debug, Serialize)]
struct NotReadyResponse {
    movie_id: String,
    availability: Availability,
}

/// Optional `Range` header. Malformed values are ignored and the whole file
/// is served.
pub struct RangeHeader(pub Option<ByteRange>);

impl<S: Send + Sync> FromRequestParts<S> for RangeHeader {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(RangeHeader(
            parts
                .headers
                .get(HEADER_BYTE_RANGE)
                .and_then(|x| x.to_str().ok())
                .and_then(ByteRange::parse),
        ))
    }
}

fn stream_error_response(error: StreamError, config: &ServerConfig) -> Response {
    match error {
        StreamError::VideoNotReady {
            movie_id,
            availability,
        } => {
            debug!("Movie {} not ready ({})", movie_id, availability.as_str());
            let mut headers = HeaderMap::new();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(config.retry_after_secs));
            (
                StatusCode::SERVICE_UNAVAILABLE,
                headers,
                Json(NotReadyResponse {
                    movie_id,
                    availability,
                }),
            )
                .into_response()
        }
        StreamError::RangeNotSatisfiable { size, .. } => range_not_satisfiable(size),
        StreamError::Io(e) => {
            error!("Failed to read movie from cache: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn range_not_satisfiable(size: u64) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response()
}

/// GET /{movie_id}/info - Size and content type of a resident movie
async fn get_stream_info(
    State(stream_server): State<StreamServer>,
    State(config): State<ServerConfig>,
    Path(movie_id): Path<String>,
) -> Response {
    match stream_server.get_stream_info(&movie_id) {
        Ok(info) => Json(info).into_response(),
        Err(e) => stream_error_response(e, &config),
    }
}

/// GET /{movie_id} - Stream a resident movie, honouring `Range`
async fn stream_movie(
    State(stream_server): State<StreamServer>,
    State(config): State<ServerConfig>,
    Path(movie_id): Path<String>,
    RangeHeader(byte_range): RangeHeader,
) -> Response {
    let info = match stream_server.get_stream_info(&movie_id) {
        Ok(info) => info,
        Err(e) => return stream_error_response(e, &config),
    };

    let (start, end) = match byte_range {
        None => (0, None),
        Some(range) => match range.resolve(info.size_bytes) {
            Some(resolved) => resolved,
            None => return range_not_satisfiable(info.size_bytes),
        },
    };

    let reader = match stream_server.read_range(&movie_id, start, end).await {
        Ok(reader) => reader,
        Err(e) => return stream_error_response(e, &config),
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(reader.content_type()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(reader.len()));

    let status = match byte_range {
        None => StatusCode::OK,
        Some(_) => {
            let content_range = format!(
                "bytes {}-{}/{}",
                reader.start(),
                reader.end_inclusive(),
                reader.total_size()
            );
            if let Ok(value) = HeaderValue::from_str(&content_range) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            StatusCode::PARTIAL_CONTENT
        }
    };

    debug!(
        "Streaming {} bytes {}-{} of {}",
        movie_id,
        reader.start(),
        reader.end_inclusive(),
        reader.total_size()
    );
    (status, headers, Body::from_stream(reader)).into_response()
}

pub fn make_stream_routes(state: ServerState) -> Router {
    Router::new()
        .route("/{movie_id}", get(stream_movie))
        .route("/{movie_id}/info", get(get_stream_info))
        .with_state(state)
}
