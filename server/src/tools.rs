//! Tool definitions and execution.
//!
//! The model is offered five tools on regular turns and none on
//! reasoning-model turns. Execution is total: an unknown tool or a failed
//! call returns an error object as the tool result rather than failing
//! the turn.

use std::sync::Arc;

use serde_json::{json, Value};
use shared_types::StreamEvent;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::artifacts::Artifacts;
use crate::config::REASONING_CHAT_MODEL;
use crate::provider::ToolSpec;
use crate::search::WebSearch;

pub const WEB_SEARCH: &str = "webSearch";
pub const GET_WEATHER: &str = "getWeather";
pub const CREATE_DOCUMENT: &str = "createDocument";
pub const UPDATE_DOCUMENT: &str = "updateDocument";
pub const REQUEST_SUGGESTIONS: &str = "requestSuggestions";

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// The tool set for a selected model. The reasoning model and tools are
/// mutually exclusive.
pub fn active_tools(model_id: &str) -> Vec<ToolSpec> {
    if model_id == REASONING_CHAT_MODEL {
        return vec![];
    }
    vec![
        ToolSpec {
            name: GET_WEATHER.to_string(),
            description: "Get the current weather at a location".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "latitude": { "type": "number" },
                    "longitude": { "type": "number" }
                },
                "required": ["latitude", "longitude"]
            }),
        },
        ToolSpec {
            name: CREATE_DOCUMENT.to_string(),
            description: "Create a document artifact for writing or code".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "kind": { "type": "string", "enum": ["text", "code"] }
                },
                "required": ["title", "kind"]
            }),
        },
        ToolSpec {
            name: UPDATE_DOCUMENT.to_string(),
            description: "Update an existing document artifact with the given description".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "description": { "type": "string" }
                },
                "required": ["id", "description"]
            }),
        },
        ToolSpec {
            name: REQUEST_SUGGESTIONS.to_string(),
            description: "Request writing suggestions for a document".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "documentId": { "type": "string" }
                },
                "required": ["documentId"]
            }),
        },
        ToolSpec {
            name: WEB_SEARCH.to_string(),
            description: "Search the web for current information".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to run on the web"
                    }
                },
                "required": ["query"]
            }),
        },
    ]
}

/// Executes tool calls on behalf of the turn orchestrator.
pub struct ToolRegistry {
    search: Arc<WebSearch>,
    artifacts: Arc<Artifacts>,
    http: reqwest::Client,
}

impl ToolRegistry {
    pub fn new(search: Arc<WebSearch>, artifacts: Arc<Artifacts>, http: reqwest::Client) -> Self {
        Self {
            search,
            artifacts,
            http,
        }
    }

    /// Run one tool call and return its result as a JSON value. Artifact
    /// tools additionally emit delta events on `events` while drafting.
    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Value {
        info!(tool = name, "executing tool call");
        match name {
            WEB_SEARCH => {
                let query = args["query"].as_str().unwrap_or_default();
                let results = self.search.search(query).await;
                json!(results)
            }
            GET_WEATHER => self.get_weather(args).await,
            CREATE_DOCUMENT => self.artifacts.create_document(args, events).await,
            UPDATE_DOCUMENT => self.artifacts.update_document(args, events).await,
            REQUEST_SUGGESTIONS => self.artifacts.request_suggestions(args).await,
            other => {
                error!(tool = other, "model requested an unknown tool");
                json!({ "error": format!("unknown tool: {other}") })
            }
        }
    }

    async fn get_weather(&self, args: &Value) -> Value {
        let (Some(latitude), Some(longitude)) = (args["latitude"].as_f64(), args["longitude"].as_f64())
        else {
            return json!({ "error": "latitude and longitude are required" });
        };

        let response = self
            .http
            .get(OPEN_METEO_URL)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", "temperature_2m".to_string()),
                ("hourly", "temperature_2m".to_string()),
                ("daily", "sunrise,sunset".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => r
                .json::<Value>()
                .await
                .unwrap_or_else(|e| json!({ "error": format!("invalid weather payload: {e}") })),
            Ok(r) => json!({ "error": format!("weather provider returned {}", r.status()) }),
            Err(e) => json!({ "error": format!("weather request failed: {e}") }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CHAT_MODEL;

    #[test]
    fn regular_model_gets_all_five_tools() {
        let tools = active_tools(DEFAULT_CHAT_MODEL);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                GET_WEATHER,
                CREATE_DOCUMENT,
                UPDATE_DOCUMENT,
                REQUEST_SUGGESTIONS,
                WEB_SEARCH
            ]
        );
    }

    #[test]
    fn reasoning_model_gets_no_tools() {
        assert!(active_tools(REASONING_CHAT_MODEL).is_empty());
    }
}
