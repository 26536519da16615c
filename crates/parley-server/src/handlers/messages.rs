//! Message handlers and the per-chat SSE change feed.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use parley_core::ChatMessage;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::auth::CurrentUser;
use crate::dto::{MessageEvent, SendMessageRequest, SendMessageResponse};
use crate::error::AppError;
use crate::services;
use crate::ServerState;

pub async fn list(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    Ok(Json(services::messages::list(&state, &user_id, &chat_id)?))
}

const PREVIEW_CHARS: usize = 50;

/// First characters of a message for request logs.
fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// Accepts a message; the reply is generated in the background.
pub async fn send(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), AppError> {
    info!("Send request in chat {} from {}: {}...", chat_id, user_id, preview(&req.content));
    let placeholder = services::messages::send(&state, &user_id, &chat_id, req)?;
    Ok((StatusCode::ACCEPTED, Json(SendMessageResponse { message_id: placeholder.id })))
}

/// Events for `chat_id` from a change feed subscription.
///
/// A receiver that falls behind skips the missed events and keeps going.
fn chat_feed(rx: broadcast::Receiver<MessageEvent>, chat_id: String) -> impl Stream<Item = MessageEvent> {
    BroadcastStream::new(rx).filter_map(move |item| {
        let event = match item {
            Ok(event) if event.chat_id() == chat_id => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Change feed for chat {} lagged, skipped {} events", chat_id, skipped);
                None
            }
        };
        futures::future::ready(event)
    })
}

/// Streams `MessageEvent`s for one chat.
///
/// Subscribers that fall behind should re-read the message list.
pub async fn events(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    services::chats::get(&state, &user_id, &chat_id)?;
    info!("Change feed opened for chat {} by {}", chat_id, user_id);

    let stream = chat_feed(state.events.subscribe(), chat_id).filter_map(|event| {
        let frame = Event::default().event(event.kind()).json_data(&event).ok().map(Ok);
        futures::future::ready(frame)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
