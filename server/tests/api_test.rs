//! Router-level checks: the health probe stays open, everything else is
//! behind the session gate.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware as axum_middleware,
    routing::post,
    Router,
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_sessions::{Session, SessionManagerLayer};

use ripple_server::config::Config;
use ripple_server::session_store::SqliteSessionStore;
use ripple_server::{api, auth, db, middleware, AppState};

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: String::new(),
        search_api_key: None,
        search_engine_id: None,
        search_quota: 100,
        search_window: std::time::Duration::from_secs(60),
        llm_base_url: String::new(),
        llm_api_key: None,
        llm_model: "fake-model".to_string(),
        llm_reasoning_model: "fake-reasoning".to_string(),
        llm_title_model: "fake-title".to_string(),
    }
}

async fn login(session: Session) -> StatusCode {
    auth::set_user(&session, "user-a", "ada").await.unwrap();
    StatusCode::OK
}

async fn logout(session: Session) -> StatusCode {
    auth::clear(&session).await.unwrap();
    StatusCode::OK
}

/// The API router behind its auth gate, plus a minimal stand-in for the
/// external session-issuing service.
async fn app() -> Router {
    let pool = db::connect_memory().await.unwrap();
    let session_layer = SessionManagerLayer::new(SqliteSessionStore::new(pool.clone()));
    let state = AppState::build(test_config(), pool).unwrap();

    api::router()
        .layer(axum_middleware::from_fn(middleware::require_auth))
        .with_state(state)
        .merge(
            Router::new()
                .route("/session/login", post(login))
                .route("/session/logout", post(logout)),
        )
        .layer(session_layer)
}

#[tokio::test]
async fn health_is_reachable_without_a_session() {
    let response = app()
        .await
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn api_routes_require_a_session() {
    let app = app().await;

    for path in [
        "/api/chats",
        "/api/config/search-status",
        "/api/diagnostics/search",
    ] {
        let response = app
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
    }
}

#[tokio::test]
async fn turn_submission_requires_a_session() {
    let response = app()
        .await
        .oneshot(
            Request::post("/api/chat")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "id": uuid::Uuid::new_v4(),
                        "messages": [],
                        "selectedChatModel": "chat-model",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn a_logged_in_session_reaches_the_api_until_logout() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(Request::post("/session/login").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login must issue a session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/chats")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"[]");

    let response = app
        .clone()
        .oneshot(
            Request::post("/session/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get("/api/chats")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
