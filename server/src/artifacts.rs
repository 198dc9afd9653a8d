//! Document artifacts: model-drafted code and text the user can edit.
//!
//! An artifact is drafted by a secondary model stream. Code drafts pass
//! through the fence sanitizer on every delta so the editable surface
//! never sees markdown delimiters; the accumulated-so-far content is
//! re-emitted as a `code-delta` event each time it grows.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use serde_json::{json, Value};
use shared_types::StreamEvent;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::prompts;
use crate::provider::{ChatRequest, LanguageModel, ModelEvent};
use crate::sanitize::strip_code_fences;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Text,
    Code,
}

impl ArtifactKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "code" => Some(Self::Code),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
        }
    }
}

#[derive(Debug, Clone)]
struct Document {
    title: String,
    kind: ArtifactKind,
    content: String,
}

/// Drafts and revises document artifacts. Documents live in process memory
/// for the lifetime of the server; durable artifact storage is the
/// frontend's concern.
pub struct Artifacts {
    model: Arc<dyn LanguageModel>,
    /// Upstream model used for drafting.
    draft_model: String,
    documents: DashMap<Uuid, Document>,
}

impl Artifacts {
    pub fn new(model: Arc<dyn LanguageModel>, draft_model: String) -> Self {
        Self {
            model,
            draft_model,
            documents: DashMap::new(),
        }
    }

    pub async fn create_document(
        &self,
        args: &Value,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Value {
        let title = args["title"].as_str().unwrap_or("Untitled").to_string();
        let Some(kind) = args["kind"].as_str().and_then(ArtifactKind::parse) else {
            return json!({ "error": "kind must be \"text\" or \"code\"" });
        };

        let system = match kind {
            ArtifactKind::Code => prompts::CODE_PROMPT,
            ArtifactKind::Text => prompts::TEXT_PROMPT,
        };

        let id = Uuid::new_v4();
        let content = match self.draft(id, kind, system.to_string(), title.clone(), events).await {
            Ok(content) => content,
            Err(message) => return json!({ "error": message }),
        };

        self.documents.insert(
            id,
            Document {
                title: title.clone(),
                kind,
                content: content.clone(),
            },
        );
        json!({ "id": id, "title": title, "kind": kind.as_str(), "content": content })
    }

    pub async fn update_document(
        &self,
        args: &Value,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Value {
        let Some(id) = args["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()) else {
            return json!({ "error": "a valid document id is required" });
        };
        let description = args["description"].as_str().unwrap_or_default().to_string();

        let Some(doc) = self.documents.get(&id).map(|d| d.value().clone()) else {
            return json!({ "error": format!("document {id} not found") });
        };

        let system = prompts::update_document_prompt(&doc.content, doc.kind.as_str());
        let content = match self.draft(id, doc.kind, system, description, events).await {
            Ok(content) => content,
            Err(message) => return json!({ "error": message }),
        };

        if let Some(mut entry) = self.documents.get_mut(&id) {
            entry.content = content.clone();
        }
        json!({ "id": id, "title": doc.title, "kind": doc.kind.as_str(), "content": content })
    }

    pub async fn request_suggestions(&self, args: &Value) -> Value {
        let Some(id) = args["documentId"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            return json!({ "error": "a valid documentId is required" });
        };
        let Some(doc) = self.documents.get(&id).map(|d| d.value().clone()) else {
            return json!({ "error": format!("document {id} not found") });
        };

        match self
            .model
            .complete(&self.draft_model, prompts::SUGGESTIONS_PROMPT, &doc.content)
            .await
        {
            Ok(raw) => serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| {
                warn!("suggestions were not valid JSON, returning raw text");
                json!({ "suggestions": raw })
            }),
            Err(e) => {
                error!(error = %e, "suggestion generation failed");
                json!({ "error": format!("suggestion generation failed: {e}") })
            }
        }
    }

    /// Stream one draft, emitting sanitized progress for code artifacts.
    /// Returns the final (sanitized) content.
    async fn draft(
        &self,
        document_id: Uuid,
        kind: ArtifactKind,
        system: String,
        prompt: String,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<String, String> {
        let request = ChatRequest {
            model: self.draft_model.clone(),
            system,
            messages: vec![crate::provider::ProviderMessage::user(prompt)],
            tools: vec![],
        };

        let mut stream = self
            .model
            .stream_chat(request)
            .await
            .map_err(|e| format!("artifact drafting failed: {e}"))?;

        let mut raw = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(ModelEvent::TextDelta(delta)) => {
                    raw.push_str(&delta);
                    if kind == ArtifactKind::Code {
                        // Emit the full sanitized draft so far; partial
                        // fences from mid-stream chunks are tolerated.
                        let _ = events
                            .send(StreamEvent::CodeDelta {
                                document_id,
                                content: strip_code_fences(&raw),
                            })
                            .await;
                    }
                }
                Ok(ModelEvent::ToolCalls(_)) | Ok(ModelEvent::Done) => {}
                Err(e) => return Err(format!("artifact drafting failed: {e}")),
            }
        }

        Ok(match kind {
            ArtifactKind::Code => strip_code_fences(&raw),
            ArtifactKind::Text => raw.trim().to_string(),
        })
    }
}
