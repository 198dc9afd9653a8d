//! Request-level auth gate.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_sessions::Session;

use crate::auth;

/// Middleware: require an authenticated session for the API surface.
/// The health probe stays open so load balancers can reach it.
pub async fn require_auth(session: Session, req: Request, next: Next) -> Response {
    let path = req.uri().path();

    if path == "/health" {
        return next.run(req).await;
    }

    if auth::get_user_id(&session).await.is_none() {
        return (StatusCode::UNAUTHORIZED, "not authenticated").into_response();
    }

    next.run(req).await
}
