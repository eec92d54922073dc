//! Live progress WebSocket
//!
//! `GET /ws` streams every progress event; `GET /ws?run_id=<uuid>` only
//! that run's. Each frame is one JSON-encoded event. Frames sent by the
//! client are ignored apart from close.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::AppState;
use crate::gateway::{ConnectionHandle, ConnectionRegistry, TopicFilter};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub run_id: Option<Uuid>,
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let topics = match query.run_id {
        Some(run_id) => TopicFilter::single(run_id),
        None => TopicFilter::AllRuns,
    };
    let registry = state.registry.clone();
    let buffer = state.config.ws_buffer_size;

    ws.on_upgrade(move |socket| handle_socket(socket, registry, topics, buffer))
}

async fn handle_socket(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    topics: TopicFilter,
    buffer: usize,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (handle, mut rx) = ConnectionHandle::new(topics, buffer);
    let connection_id = registry.register(handle);
    tracing::info!(connection_id = %connection_id, observers = registry.len(), "WebSocket connected");

    // Writer: drains this connection's channel. Ends when the registry drops
    // the connection or the socket stops accepting frames.
    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_sink.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_stream.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.deregister(connection_id);
    tracing::info!(connection_id = %connection_id, "WebSocket disconnected");
}
