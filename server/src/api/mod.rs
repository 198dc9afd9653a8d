//! HTTP surface.
//!
//! The turn endpoint answers with a newline-delimited JSON event stream;
//! everything that can still fail as a plain HTTP status has already
//! happened by the time the first byte is written.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_sessions::Session;
use uuid::Uuid;

use shared_types::ChatTurnRequest;

use crate::auth;
use crate::error::TurnError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_turn))
        .route("/api/chat/{id}", delete(delete_chat))
        .route("/api/chat/{id}/messages", get(chat_messages))
        .route("/api/chats", get(list_chats))
        .route("/api/config/search-status", get(search_status))
        .route("/api/diagnostics/search", get(search_diagnostics))
}

async fn health() -> &'static str {
    "ok"
}

/// Run one chat turn. Pre-stream failures (auth, ownership, malformed
/// submission, storage) map to statuses; once the stream opens, the body
/// is NDJSON events terminated by a `finish` record.
async fn chat_turn(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(request): Json<ChatTurnRequest>,
) -> Response {
    let user_id = auth::get_user_id(&session).await;

    let turn = match state.engine.prepare(user_id.as_deref(), request).await {
        Ok(turn) => turn,
        Err(e) => return e.into_response(),
    };

    let (tx, rx) = mpsc::channel(32);
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move { engine.stream(turn, tx).await });

    let body = Body::from_stream(ReceiverStream::new(rx).map(|event| {
        serde_json::to_string(&event).map(|mut line| {
            line.push('\n');
            line
        })
    }));

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response()
}

async fn delete_chat(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
) -> Response {
    let user_id = auth::get_user_id(&session).await;
    match state.engine.delete_chat(user_id.as_deref(), id).await {
        Ok(()) => (StatusCode::OK, "Chat deleted").into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_chats(State(state): State<Arc<AppState>>, session: Session) -> Response {
    let Some(user_id) = auth::get_user_id(&session).await else {
        return TurnError::Unauthorized.into_response();
    };
    match state.engine.store().chats_for_user(&user_id).await {
        Ok(chats) => Json(chats).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn chat_messages(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
) -> Response {
    let Some(user_id) = auth::get_user_id(&session).await else {
        return TurnError::Unauthorized.into_response();
    };

    let chat = match state.engine.store().chat(id).await {
        Ok(Some(chat)) => chat,
        Ok(None) => return TurnError::NotFound.into_response(),
        Err(e) => return e.into_response(),
    };
    if chat.user_id != user_id {
        return TurnError::Unauthorized.into_response();
    }

    match state.engine.store().messages(id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn search_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.diagnostics.credential_status().await).into_response()
}

async fn search_diagnostics(State(state): State<Arc<AppState>>) -> Response {
    Json(state.diagnostics.run_checks().await).into_response()
}
