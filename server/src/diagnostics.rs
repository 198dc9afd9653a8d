//! Search credential and connectivity diagnostics.
//!
//! Two read-only reports: a credential probe that actually calls the
//! search provider to distinguish "missing" from "present but rejected",
//! and a broader checklist covering configuration, provider reachability,
//! and recent search failures. Secret values never appear in either
//! report; anything that might echo one is redacted first.

use std::sync::Arc;

use reqwest::StatusCode;
use shared_types::{CredentialCheck, CredentialStatus, DiagnosticCheck, DiagnosticStatus};
use tracing::{info, warn};

use crate::config::Config;
use crate::search::error_log::SearchErrorLog;

const PROBE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const REACHABILITY_ENDPOINT: &str = "https://www.googleapis.com/";

pub struct Diagnostics {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    engine_id: Option<String>,
    own_port: u16,
    error_log: Arc<SearchErrorLog>,
}

impl Diagnostics {
    pub fn new(config: &Config, http: reqwest::Client, error_log: Arc<SearchErrorLog>) -> Self {
        Self {
            http,
            endpoint: PROBE_ENDPOINT.to_string(),
            api_key: config.search_api_key.clone(),
            engine_id: config.search_engine_id.clone(),
            own_port: config.port,
            error_log,
        }
    }

    /// Probe the search provider with a throwaway query and classify the
    /// outcome per credential.
    pub async fn credential_status(&self) -> CredentialStatus {
        let api_key_exists = self.api_key.is_some();
        let engine_id_exists = self.engine_id.is_some();

        let (Some(api_key), Some(engine_id)) = (self.api_key.as_deref(), self.engine_id.as_deref())
        else {
            return CredentialStatus {
                is_valid: false,
                api_key: CredentialCheck {
                    exists: api_key_exists,
                    is_valid: false,
                    error: (!api_key_exists).then(|| "GOOGLE_API_KEY is not set".to_string()),
                },
                search_engine_id: CredentialCheck {
                    exists: engine_id_exists,
                    is_valid: false,
                    error: (!engine_id_exists)
                        .then(|| "GOOGLE_SEARCH_ENGINE_ID is not set".to_string()),
                },
                message: "Search credentials are not fully configured".to_string(),
            };
        };

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("key", api_key), ("cx", engine_id), ("q", "test"), ("num", "1")])
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => {
                info!("search credential probe succeeded");
                CredentialStatus {
                    is_valid: true,
                    api_key: valid_check(),
                    search_engine_id: valid_check(),
                    message: "Google API credentials are valid".to_string(),
                }
            }
            Ok(r) => {
                let status = r.status();
                let body = self.redact(&r.text().await.unwrap_or_default());
                warn!(status = %status, "search credential probe rejected");
                self.classify_rejection(status, &body)
            }
            Err(e) => {
                let message = self.redact(&e.to_string());
                warn!(error = %message, "search credential probe failed to connect");
                CredentialStatus {
                    is_valid: false,
                    api_key: CredentialCheck {
                        exists: true,
                        is_valid: false,
                        error: Some(message.clone()),
                    },
                    search_engine_id: CredentialCheck {
                        exists: true,
                        is_valid: false,
                        error: None,
                    },
                    message: format!("Could not reach the search provider: {message}"),
                }
            }
        }
    }

    /// A 403 points at the key; a 400 mentioning `cx` points at the engine
    /// id; anything else is reported verbatim (redacted).
    fn classify_rejection(&self, status: StatusCode, body: &str) -> CredentialStatus {
        let key_invalid = status == StatusCode::FORBIDDEN;
        let engine_invalid = status == StatusCode::BAD_REQUEST && body.contains("cx");

        CredentialStatus {
            is_valid: false,
            api_key: CredentialCheck {
                exists: true,
                is_valid: !key_invalid,
                error: key_invalid
                    .then(|| "The API key was rejected (403 Forbidden)".to_string()),
            },
            search_engine_id: CredentialCheck {
                exists: true,
                is_valid: !engine_invalid,
                error: engine_invalid
                    .then(|| "The search engine id was rejected (400 Bad Request)".to_string()),
            },
            message: format!("Credential probe returned {status}: {body}"),
        }
    }

    /// Run the full diagnostic checklist.
    pub async fn run_checks(&self) -> Vec<DiagnosticCheck> {
        let mut checks = Vec::with_capacity(4);

        checks.push(match (self.api_key.is_some(), self.engine_id.is_some()) {
            (true, true) => DiagnosticCheck {
                name: "Environment Variables".to_string(),
                status: DiagnosticStatus::Ok,
                message: "GOOGLE_API_KEY and GOOGLE_SEARCH_ENGINE_ID are set".to_string(),
            },
            (key, engine) => DiagnosticCheck {
                name: "Environment Variables".to_string(),
                status: DiagnosticStatus::Error,
                message: format!(
                    "GOOGLE_API_KEY: {}, GOOGLE_SEARCH_ENGINE_ID: {}",
                    if key { "set" } else { "missing" },
                    if engine { "set" } else { "missing" },
                ),
            },
        });

        // Reachability only: no credentials on this request, so any 2xx-4xx
        // answer proves the network path works.
        checks.push(match self.http.head(REACHABILITY_ENDPOINT).send().await {
            Ok(_) => DiagnosticCheck {
                name: "API Connectivity".to_string(),
                status: DiagnosticStatus::Ok,
                message: "The Google APIs host is reachable".to_string(),
            },
            Err(e) => DiagnosticCheck {
                name: "API Connectivity".to_string(),
                status: DiagnosticStatus::Error,
                message: format!("Could not reach the Google APIs host: {}", self.redact(&e.to_string())),
            },
        });

        let health_url = format!("http://127.0.0.1:{}/health", self.own_port);
        checks.push(match self.http.get(&health_url).send().await {
            Ok(r) if r.status().is_success() => DiagnosticCheck {
                name: "API Surface".to_string(),
                status: DiagnosticStatus::Ok,
                message: "The server's own health endpoint is reachable".to_string(),
            },
            Ok(r) => DiagnosticCheck {
                name: "API Surface".to_string(),
                status: DiagnosticStatus::Warning,
                message: format!("The health endpoint answered with status {}", r.status()),
            },
            Err(e) => DiagnosticCheck {
                name: "API Surface".to_string(),
                status: DiagnosticStatus::Error,
                message: format!("Could not reach the server's own health endpoint: {e}"),
            },
        });

        let recent = self.error_log.recent();
        checks.push(if recent.is_empty() {
            DiagnosticCheck {
                name: "Recent Search Errors".to_string(),
                status: DiagnosticStatus::Ok,
                message: "No search failures recorded since startup".to_string(),
            }
        } else {
            DiagnosticCheck {
                name: "Recent Search Errors".to_string(),
                status: DiagnosticStatus::Warning,
                message: format!(
                    "{} recent search failure(s): {}",
                    recent.len(),
                    recent
                        .iter()
                        .map(|e| self.redact(&format!("[{}] {}", e.query, e.error)))
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
            }
        });

        checks
    }

    /// Replace any occurrence of a configured secret with a placeholder.
    fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        if let Some(key) = &self.api_key {
            out = out.replace(key.as_str(), "[REDACTED]");
        }
        out
    }
}

fn valid_check() -> CredentialCheck {
    CredentialCheck {
        exists: true,
        is_valid: true,
        error: None,
    }
}
