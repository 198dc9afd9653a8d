//! Shared application state and its wiring.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::artifacts::Artifacts;
use crate::chat::store::SqliteChatStore;
use crate::chat::TurnEngine;
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::observe::TracingObserver;
use crate::provider::OpenAiCompatModel;
use crate::search::error_log::SearchErrorLog;
use crate::search::WebSearch;
use crate::tools::ToolRegistry;

pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub engine: Arc<TurnEngine>,
    pub diagnostics: Arc<Diagnostics>,
}

impl AppState {
    /// Wire the full component graph on top of an open database pool.
    pub fn build(config: Config, db: SqlitePool) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let error_log = Arc::new(SearchErrorLog::new());
        let search = Arc::new(WebSearch::new(&config, http.clone(), Arc::clone(&error_log)));
        let model: Arc<OpenAiCompatModel> =
            Arc::new(OpenAiCompatModel::new(&config, http.clone()));
        let artifacts = Arc::new(Artifacts::new(
            model.clone(),
            config.llm_title_model.clone(),
        ));
        let tools = Arc::new(ToolRegistry::new(
            Arc::clone(&search),
            artifacts,
            http.clone(),
        ));
        let store = Arc::new(SqliteChatStore::new(db.clone()));

        let engine = Arc::new(TurnEngine::new(
            store,
            model,
            Arc::clone(&search),
            tools,
            Arc::new(TracingObserver),
            Arc::clone(&config),
        ));
        let diagnostics = Arc::new(Diagnostics::new(&config, http, error_log));

        Ok(Arc::new(Self {
            db,
            config,
            engine,
            diagnostics,
        }))
    }
}
