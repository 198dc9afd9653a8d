use std::sync::Arc;

use axum::middleware as axum_middleware;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ripple_server::{api, config, db, middleware, session_store, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple_server=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    info!(port = config.port, "ripple server starting");

    let pool = db::connect(&config.database_url).await?;

    // Session store shares the pool; sessions survive restarts.
    let session_store = session_store::SqliteSessionStore::new(pool.clone());
    tokio::spawn(session_store::run_expired_session_cleanup(
        session_store.clone(),
        std::time::Duration::from_secs(3600),
    ));

    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // set true in prod (HTTPS only)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(24)));

    let state = AppState::build(config, pool)?;

    let app = api::router()
        .layer(axum_middleware::from_fn(middleware::require_auth))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", state.config.port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
