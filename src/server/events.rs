//! WebSocket feed of download progress events.
//!
//! `GET /v1/downloads/events` streams every event from the combined
//! `downloads` topic; `?movie_id=...` narrows it to `downloads/{movie_id}`.
//! On connect, the current state of each matching active task is sent first.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use crate::download_manager::DownloadOrchestrator;
use crate::notifications::{movie_topic, ProgressEvent, DOWNLOADS_TOPIC};
use crate::server::state::GuardedBroadcastChannel;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub movie_id: Option<String>,
}

pub async fn events_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<EventsQuery>,
    State(events): State<GuardedBroadcastChannel>,
    State(orchestrator): State<DownloadOrchestrator>,
) -> Response {
    let topic = match &query.movie_id {
        Some(movie_id) => movie_topic(movie_id),
        None => DOWNLOADS_TOPIC.to_string(),
    };
    debug!("WebSocket upgrade for progress topic {}", topic);

    ws.on_upgrade(move |socket| handle_socket(socket, topic, query.movie_id, events, orchestrator))
}

async fn handle_socket(
    socket: WebSocket,
    topic: String,
    movie_id: Option<String>,
    events: GuardedBroadcastChannel,
    orchestrator: DownloadOrchestrator,
) {
    // Subscribe before taking the snapshot so no transition falls in between.
    let mut rx = events.subscribe();
    let (mut ws_sink, mut ws_stream) = socket.split();

    let snapshot: Vec<ProgressEvent> = orchestrator
        .list_active()
        .iter()
        .filter(|t| movie_id.as_deref().map_or(true, |id| id == t.movie_id))
        .map(ProgressEvent::from_task)
        .collect();
    for event in snapshot {
        if send_event(&mut ws_sink, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            },
            message = rx.recv() => match message {
                Ok(message) if message.topic == topic => {
                    if send_event(&mut ws_sink, &message.event).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Progress subscriber on {} lagged, skipped {} events", topic, skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("WebSocket for {} closed", topic);
}

async fn send_event(
    ws_sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    event: &ProgressEvent,
) -> Result<(), ()> {
    match serde_json::to_string(event) {
        Ok(json) => ws_sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| ()),
        Err(e) => {
            error!("Failed to serialize progress event: {}", e);
            Ok(())
        }
    }
}
