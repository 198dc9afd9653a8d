//! Stream observation hooks.
//!
//! The browser side of this application used to watch chat traffic by
//! replacing the platform fetch primitive; the server-side contract is an
//! explicit interceptor instead: implementations are notified when a turn's
//! stream opens and when it settles. The default observer just logs.

use tracing::info;
use uuid::Uuid;

pub trait StreamObserver: Send + Sync {
    fn on_request_start(&self, chat_id: Uuid, model_id: &str);
    fn on_response_end(&self, chat_id: Uuid, ok: bool);
}

/// Default observer: structured log lines, nothing else.
pub struct TracingObserver;

impl StreamObserver for TracingObserver {
    fn on_request_start(&self, chat_id: Uuid, model_id: &str) {
        info!(%chat_id, model_id, "chat stream opened");
    }

    fn on_response_end(&self, chat_id: Uuid, ok: bool) {
        info!(%chat_id, ok, "chat stream settled");
    }
}
