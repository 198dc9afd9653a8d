use std::time::Duration;

/// Model ids the client selects between. The reasoning variant exposes no
/// tools.
pub const DEFAULT_CHAT_MODEL: &str = "chat-model";
pub const REASONING_CHAT_MODEL: &str = "chat-model-reasoning";

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the server listens on
    pub port: u16,
    /// Path to the SQLite database
    pub database_url: String,
    /// Google Custom Search API key. Absent → search degrades to synthetic
    /// configuration-error results, never a hard failure.
    pub search_api_key: Option<String>,
    /// Google Programmable Search Engine id (the `cx` parameter).
    pub search_engine_id: Option<String>,
    /// Search requests allowed per window (free tier: 100/day).
    pub search_quota: u32,
    /// Length of the search rate-limit window.
    pub search_window: Duration,
    /// OpenAI-compatible chat completions base URL.
    pub llm_base_url: String,
    /// API key for the model provider.
    pub llm_api_key: Option<String>,
    /// Upstream model name behind the `chat-model` id.
    pub llm_model: String,
    /// Upstream model name behind the `chat-model-reasoning` id.
    pub llm_reasoning_model: String,
    /// Upstream model used for title generation and artifact drafting.
    pub llm_title_model: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: env_parse("RIPPLE_PORT", 8090)?,
            database_url: env_str("RIPPLE_DATABASE_URL", "sqlite:./data/ripple.db"),
            search_api_key: env_opt("GOOGLE_API_KEY"),
            search_engine_id: env_opt("GOOGLE_SEARCH_ENGINE_ID"),
            search_quota: env_parse("SEARCH_QUOTA_PER_DAY", 100)?,
            search_window: Duration::from_secs(env_parse(
                "SEARCH_WINDOW_SECS",
                24 * 60 * 60,
            )?),
            llm_base_url: env_str("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: env_opt("LLM_API_KEY"),
            llm_model: env_str("LLM_MODEL", "gpt-4o"),
            llm_reasoning_model: env_str("LLM_REASONING_MODEL", "o3-mini"),
            llm_title_model: env_str("LLM_TITLE_MODEL", "gpt-4o-mini"),
        })
    }

    /// Resolve a client-facing model id to the upstream model name.
    pub fn upstream_model(&self, selected: &str) -> &str {
        if selected == REASONING_CHAT_MODEL {
            &self.llm_reasoning_model
        } else {
            &self.llm_model
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
