//! Web-search augmentation.
//!
//! A message whose first text part starts with `/web ` is a search turn:
//! the remainder is the query, the prefix is stripped before anything is
//! persisted or shown to the model, and the query goes to the Google
//! Custom Search API under a process-wide quota.
//!
//! Every path through [`WebSearch::search`] is total. Missing credentials,
//! rate limits, provider errors, and network failures all come back as
//! synthetic result records so the condition is visible inline in the
//! conversation instead of being silently dropped.

pub mod error_log;
pub mod rate_limit;

use std::sync::Arc;

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use shared_types::{MessagePart, SearchResult, TurnMessage};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use error_log::SearchErrorLog;
use rate_limit::RateLimiter;

/// Reserved message prefix that triggers a search turn.
pub const TRIGGER_PREFIX: &str = "/web ";

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// Provider results requested and returned per query.
const RESULT_CAP: usize = 5;

/// Maximum raw-error excerpt carried into a synthetic result.
const ERROR_EXCERPT_LEN: usize = 300;

/// If the message opens with the trigger prefix, strip it in place and
/// return the extracted query. Non-triggering messages are left untouched.
pub fn apply_search_trigger(message: &mut TurnMessage) -> Option<String> {
    let first_text = message.parts.first().and_then(MessagePart::as_text)?;
    let query = first_text.strip_prefix(TRIGGER_PREFIX)?.trim().to_string();

    message.parts[0] = MessagePart::Text {
        text: query.clone(),
    };
    Some(query)
}

/// Google Custom Search client with quota tracking and failure history.
pub struct WebSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    engine_id: Option<String>,
    limiter: RateLimiter,
    error_log: Arc<SearchErrorLog>,
}

impl WebSearch {
    pub fn new(config: &Config, client: reqwest::Client, error_log: Arc<SearchErrorLog>) -> Self {
        Self {
            client,
            endpoint: SEARCH_ENDPOINT.to_string(),
            api_key: config.search_api_key.clone(),
            engine_id: config.search_engine_id.clone(),
            limiter: RateLimiter::new(config.search_quota, config.search_window),
            error_log,
        }
    }

    /// Run one web search. Never fails and never returns an empty list.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        info!(query, "web search requested");

        let (Some(api_key), Some(engine_id)) = (self.api_key.as_deref(), self.engine_id.as_deref())
        else {
            error!("web search missing provider credentials");
            self.error_log.record(query, "missing credentials");
            return missing_credentials_results(
                self.api_key.is_some(),
                self.engine_id.is_some(),
            );
        };

        if !self.limiter.can_make_request() {
            let (count, quota) = self.limiter.usage();
            error!(count, quota, "web search rate limit exceeded");
            self.error_log.record(query, "rate limit exceeded");
            return vec![SearchResult {
                title: "Search Rate Limit Exceeded".to_string(),
                link: "#".to_string(),
                snippet: "The daily quota for web searches has been reached. Please try again tomorrow.".to_string(),
            }];
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", api_key),
                ("cx", engine_id),
                ("q", query),
                ("num", &RESULT_CAP.to_string()),
            ])
            .header("Accept", "application/json")
            .send()
            .await;

        // The provider call counts against the quota whether or not it
        // succeeded.
        self.limiter.record_request();
        let (count, quota) = self.limiter.usage();
        debug!(count, quota, "web search quota counted");

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "web search request failed");
                self.error_log.record(query, &e.to_string());
                return network_error_results(query, &e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "web search provider returned an error");
            self.error_log
                .record(query, &format!("provider status {status}"));
            return error_status_results(status, &body);
        }

        match response.json::<ProviderPayload>().await {
            Ok(payload) => {
                let results = map_success_payload(query, payload);
                info!(count = results.len(), query, "web search returned results");
                results
            }
            Err(e) => {
                // Schema mismatch fails closed into a synthetic result.
                error!(error = %e, "web search payload failed validation");
                self.error_log.record(query, &e.to_string());
                network_error_results(query, &e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Provider payload, validated at the boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProviderPayload {
    #[serde(default)]
    pub items: Option<Vec<ProviderItem>>,
    #[serde(default)]
    pub error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderItem {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub html_snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Map a 2xx payload to results. Embedded provider errors and empty item
/// lists both become synthetic records; real items fall back from snippet
/// to de-tagged html snippet to a placeholder.
pub fn map_success_payload(query: &str, payload: ProviderPayload) -> Vec<SearchResult> {
    if let Some(err) = payload.error {
        warn!(code = ?err.code, "web search payload carried an embedded error");
        return vec![SearchResult {
            title: "Search API Error".to_string(),
            link: "#".to_string(),
            snippet: format!(
                "Error {}: {}",
                err.code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                err.message.unwrap_or_else(|| "no message".to_string()),
            ),
        }];
    }

    let items = payload.items.unwrap_or_default();
    if items.is_empty() {
        return vec![SearchResult {
            title: "No results found".to_string(),
            link: "#".to_string(),
            snippet: format!("No search results found for query: \"{query}\""),
        }];
    }

    items
        .into_iter()
        .take(RESULT_CAP)
        .map(|item| {
            let snippet = item
                .snippet
                .filter(|s| !s.is_empty())
                .or_else(|| item.html_snippet.map(|h| strip_html_tags(&h)))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "No description available".to_string());
            SearchResult {
                title: item.title,
                link: item.link,
                snippet,
            }
        })
        .collect()
}

/// Map a non-2xx status to guidance results. 403 and 429 get specific
/// remediation text; anything else gets a generic record plus a truncated
/// raw-error excerpt.
pub fn error_status_results(status: StatusCode, body: &str) -> Vec<SearchResult> {
    match status {
        StatusCode::TOO_MANY_REQUESTS => vec![
            SearchResult {
                title: "Search Rate Limit Exceeded".to_string(),
                link: "#".to_string(),
                snippet: "The search API quota has been exceeded. Please try again tomorrow.".to_string(),
            },
            SearchResult {
                title: "Quota Information".to_string(),
                link: "https://developers.google.com/custom-search/v1/overview".to_string(),
                snippet: "The free tier of Google Custom Search allows 100 search queries per day. Consider upgrading to a paid plan if you need more searches.".to_string(),
            },
        ],
        StatusCode::FORBIDDEN => vec![
            SearchResult {
                title: "Search API Access Denied".to_string(),
                link: "#".to_string(),
                snippet: "Access to the search API was denied. Please check your API credentials.".to_string(),
            },
            SearchResult {
                title: "Troubleshooting Steps".to_string(),
                link: "https://console.cloud.google.com/".to_string(),
                snippet: "Verify that your API key is correct, the Custom Search API is enabled in your Google Cloud project, and billing is properly set up if required.".to_string(),
            },
        ],
        other => {
            let mut excerpt: String = body.chars().take(ERROR_EXCERPT_LEN).collect();
            if body.chars().count() > ERROR_EXCERPT_LEN {
                excerpt.push_str("...");
            }
            vec![
                SearchResult {
                    title: format!("Search API Error ({})", other.as_u16()),
                    link: "#".to_string(),
                    snippet: format!(
                        "The search API returned an error with status code {}.",
                        other.as_u16()
                    ),
                },
                SearchResult {
                    title: "Error Details".to_string(),
                    link: "#".to_string(),
                    snippet: excerpt,
                },
                SearchResult {
                    title: "Troubleshooting Help".to_string(),
                    link: "https://developers.google.com/custom-search/v1/reference/errors".to_string(),
                    snippet: "For help resolving this issue, check the provider error documentation or run the search diagnostics endpoint.".to_string(),
                },
            ]
        }
    }
}

fn missing_credentials_results(api_key_set: bool, engine_id_set: bool) -> Vec<SearchResult> {
    let key_state = |set: bool| if set { "Set (but may be invalid)" } else { "Missing" };
    vec![
        SearchResult {
            title: "Search Configuration Error".to_string(),
            link: "#".to_string(),
            snippet: "The search functionality is not properly configured. Please set GOOGLE_API_KEY and GOOGLE_SEARCH_ENGINE_ID environment variables.".to_string(),
        },
        SearchResult {
            title: "API Keys Status".to_string(),
            link: "#".to_string(),
            snippet: format!(
                "API Key: {}, Search Engine ID: {}. Check README-SEARCH.md for setup instructions.",
                key_state(api_key_set),
                key_state(engine_id_set),
            ),
        },
        SearchResult {
            title: "How to Fix".to_string(),
            link: "https://programmablesearchengine.google.com/".to_string(),
            snippet: "To fix this issue, you need to create a Google Custom Search Engine and API key. Visit the Google Programmable Search Engine page to set up your search engine.".to_string(),
        },
    ]
}

fn network_error_results(query: &str, error: &str) -> Vec<SearchResult> {
    let manual_link = Url::parse_with_params("https://www.google.com/search", [("q", query)])
        .map(|u| u.to_string())
        .unwrap_or_else(|_| "https://www.google.com".to_string());
    vec![
        SearchResult {
            title: "Search Error".to_string(),
            link: "#".to_string(),
            snippet: format!("Error searching the web: {error}"),
        },
        SearchResult {
            title: format!("Search query was: {query}"),
            link: manual_link,
            snippet: "You can try searching manually using this link.".to_string(),
        },
    ]
}

fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
