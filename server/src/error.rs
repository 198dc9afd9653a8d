//! Turn-level error taxonomy.
//!
//! Only failures that occur before streaming begins surface as HTTP
//! statuses. Search and diagnostics failures never appear here at all:
//! those paths are total and return synthetic data instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnError {
    /// No session, or the chat belongs to another user. Terminal, no retry.
    #[error("unauthorized")]
    Unauthorized,

    /// The referenced chat does not exist.
    #[error("chat not found")]
    NotFound,

    /// The submission carried no extractable user message.
    #[error("no user message found")]
    NoUserMessage,

    /// Model invocation failed. Before streaming this is an HTTP failure;
    /// after, it is delivered as an in-stream error event instead.
    #[error("stream generation failed: {0}")]
    Stream(String),

    #[error("persistence failed: {0}")]
    Store(#[from] sqlx::Error),
}

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            TurnError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            TurnError::NotFound => (StatusCode::NOT_FOUND, "Not Found"),
            TurnError::NoUserMessage => (StatusCode::BAD_REQUEST, "No user message found"),
            TurnError::Stream(_) | TurnError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while processing your request",
            ),
        };
        (status, body).into_response()
    }
}
