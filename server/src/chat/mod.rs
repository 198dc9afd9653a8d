//! The turn orchestrator.
//!
//! One turn runs `Unauthenticated → Authorized → ChatResolved →
//! MessagePersisted(user) → Streaming → Completed | Failed`. Everything up
//! to and including the user-message write happens in [`TurnEngine::prepare`]
//! and surfaces failures as HTTP statuses; [`TurnEngine::stream`] runs after
//! the transport has committed to 200, so its failures travel in-stream.
//!
//! The two durable writes of a turn (user message, assistant message) are
//! deliberately independent: the user's message must survive even when
//! generation fails afterwards.

pub mod store;

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use shared_types::{
    Chat, ChatTurnRequest, ChatVisibility, Message, MessagePart, Role, SearchResult, StreamEvent,
    TurnMessage,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::TurnError;
use crate::observe::StreamObserver;
use crate::prompts::compose_prompt;
use crate::provider::{
    ChatRequest, LanguageModel, ModelEvent, ProviderMessage, ToolSpec, WordSmoother,
};
use crate::search::{apply_search_trigger, WebSearch};
use crate::tools::{self, ToolRegistry};
use store::ChatStore;

/// Upper bound on model→tool→model round trips within one turn.
pub const MAX_TOOL_STEPS: usize = 5;

/// Everything the streaming phase needs, assembled by [`TurnEngine::prepare`]
/// after the inbound user message is durable.
pub struct PreparedTurn {
    chat_id: Uuid,
    model_id: String,
    upstream_model: String,
    system_prompt: String,
    messages: Vec<ProviderMessage>,
    tools: Vec<ToolSpec>,
    search_query: Option<String>,
    search_results: Option<Vec<SearchResult>>,
}

pub struct TurnEngine {
    store: Arc<dyn ChatStore>,
    model: Arc<dyn LanguageModel>,
    search: Arc<WebSearch>,
    tools: Arc<ToolRegistry>,
    observer: Arc<dyn StreamObserver>,
    config: Arc<Config>,
}

impl TurnEngine {
    pub fn new(
        store: Arc<dyn ChatStore>,
        model: Arc<dyn LanguageModel>,
        search: Arc<WebSearch>,
        tools: Arc<ToolRegistry>,
        observer: Arc<dyn StreamObserver>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            model,
            search,
            tools,
            observer,
            config,
        }
    }

    /// Run the pre-streaming half of a turn: authorize, resolve the chat,
    /// apply search augmentation, and persist the inbound user message.
    /// Nothing is written before authorization and ownership pass.
    pub async fn prepare(
        &self,
        user_id: Option<&str>,
        mut request: ChatTurnRequest,
    ) -> Result<PreparedTurn, TurnError> {
        let user_id = user_id.ok_or(TurnError::Unauthorized)?;

        let user_idx = request
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or(TurnError::NoUserMessage)?;

        // Rewrite happens before any persistence or model call: neither
        // storage nor the model ever sees the trigger syntax. The search
        // itself waits until the caller's claim on the chat is settled.
        let search_query = apply_search_trigger(&mut request.messages[user_idx]);

        match self.store.chat(request.id).await? {
            Some(chat) if chat.user_id != user_id => {
                warn!(chat_id = %request.id, "turn submitted against another user's chat");
                return Err(TurnError::Unauthorized);
            }
            Some(_) => {}
            None => {
                let user_text = joined_text(&request.messages[user_idx]);
                let title = match self.model.generate_title(&user_text).await {
                    Ok(title) => title,
                    Err(e) => {
                        warn!(error = %e, "title generation failed, falling back to message text");
                        user_text.chars().take(80).collect()
                    }
                };
                self.store
                    .create_chat(&Chat {
                        id: request.id,
                        user_id: user_id.to_string(),
                        title,
                        visibility: ChatVisibility::Private,
                        created_at: Utc::now(),
                    })
                    .await?;
                info!(chat_id = %request.id, "created chat");
            }
        }

        // Only an authorized owner spends search quota.
        let search_results = match &search_query {
            Some(query) => Some(self.search.search(query).await),
            None => None,
        };

        let user_message = {
            let m = &request.messages[user_idx];
            Message {
                id: m.id,
                chat_id: request.id,
                role: Role::User,
                parts: m.parts.clone(),
                attachments: m.attachments.clone(),
                created_at: Utc::now(),
            }
        };
        self.store.save_message(&user_message).await?;

        let model_id = request.selected_chat_model.clone();
        let mut messages: Vec<ProviderMessage> =
            request.messages.iter().map(to_provider_message).collect();
        if let (Some(query), Some(results)) = (&search_query, &search_results) {
            // Eagerly fetched results ride along as context; the model may
            // still call the webSearch tool for follow-up queries.
            messages.push(ProviderMessage::system(format!(
                "Results of the web search for \"{query}\" (JSON):\n{}",
                serde_json::to_string_pretty(results).unwrap_or_default()
            )));
        }

        Ok(PreparedTurn {
            chat_id: request.id,
            upstream_model: self.config.upstream_model(&model_id).to_string(),
            system_prompt: compose_prompt(&model_id, search_query.is_some()),
            tools: tools::active_tools(&model_id),
            model_id,
            messages,
            search_query,
            search_results,
        })
    }

    /// Run the streaming half of a turn, forwarding events to `events` and
    /// persisting the reconciled assistant message on completion. A closed
    /// receiver means the client went away: the provider stream is
    /// abandoned and nothing further is persisted.
    pub async fn stream(&self, turn: PreparedTurn, events: mpsc::Sender<StreamEvent>) {
        let chat_id = turn.chat_id;
        self.observer.on_request_start(chat_id, &turn.model_id);

        let send = |event: StreamEvent| {
            let events = events.clone();
            async move { events.send(event).await.is_ok() }
        };

        // Surface the eager search round-trip to the client.
        if let (Some(query), Some(results)) = (&turn.search_query, &turn.search_results) {
            let announced = send(StreamEvent::ToolCall {
                tool_name: tools::WEB_SEARCH.to_string(),
                args: json!({ "query": query }),
            })
            .await
                && send(StreamEvent::ToolResult {
                    tool_name: tools::WEB_SEARCH.to_string(),
                    result: json!(results),
                })
                .await;
            if !announced {
                self.observer.on_response_end(chat_id, false);
                return;
            }
        }

        let mut convo = turn.messages.clone();
        let mut full_text = String::new();
        let mut tool_parts: Vec<MessagePart> = Vec::new();
        let mut smoother = WordSmoother::new();
        let mut failed = false;

        'steps: for _step in 0..MAX_TOOL_STEPS {
            let request = ChatRequest {
                model: turn.upstream_model.clone(),
                system: turn.system_prompt.clone(),
                messages: convo.clone(),
                tools: turn.tools.clone(),
            };

            let mut stream = match self.model.stream_chat(request).await {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "model invocation failed");
                    failed = true;
                    let _ = send(StreamEvent::Error {
                        message: "Oops, an error occurred!".to_string(),
                    })
                    .await;
                    break;
                }
            };

            let mut calls = Vec::new();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(ModelEvent::TextDelta(delta)) => {
                        full_text.push_str(&delta);
                        if let Some(chunk) = smoother.push(&delta) {
                            if !send(StreamEvent::TextDelta { delta: chunk }).await {
                                self.observer.on_response_end(chat_id, false);
                                return;
                            }
                        }
                    }
                    Ok(ModelEvent::ToolCalls(c)) => calls = c,
                    Ok(ModelEvent::Done) => break,
                    Err(e) => {
                        error!(error = %e, "model stream failed mid-turn");
                        failed = true;
                        let _ = send(StreamEvent::Error {
                            message: "Oops, an error occurred!".to_string(),
                        })
                        .await;
                        break 'steps;
                    }
                }
            }

            if calls.is_empty() {
                break;
            }

            // Release buffered text before the tool round-trip so the
            // client sees output in order.
            if let Some(chunk) = smoother.flush() {
                if !send(StreamEvent::TextDelta { delta: chunk }).await {
                    self.observer.on_response_end(chat_id, false);
                    return;
                }
            }

            convo.push(ProviderMessage::assistant_tool_calls(json!(calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect::<Vec<_>>())));

            for call in calls {
                if !send(StreamEvent::ToolCall {
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                })
                .await
                {
                    self.observer.on_response_end(chat_id, false);
                    return;
                }

                let result = self.tools.execute(&call.name, &call.arguments, &events).await;

                if !send(StreamEvent::ToolResult {
                    tool_name: call.name.clone(),
                    result: result.clone(),
                })
                .await
                {
                    self.observer.on_response_end(chat_id, false);
                    return;
                }

                tool_parts.push(MessagePart::ToolInvocation {
                    tool_name: call.name,
                    args: call.arguments,
                    result: Some(result.clone()),
                });
                convo.push(ProviderMessage::tool_result(call.id, result.to_string()));
            }
        }

        if let Some(chunk) = smoother.flush() {
            if !send(StreamEvent::TextDelta { delta: chunk }).await {
                self.observer.on_response_end(chat_id, false);
                return;
            }
        }
        let _ = send(StreamEvent::Finish).await;
        self.observer.on_response_end(chat_id, !failed);

        if failed {
            // The client got whatever streamed plus the error notice; a
            // failed generation leaves no assistant row behind.
            return;
        }

        let mut parts = tool_parts;
        if !full_text.is_empty() {
            parts.push(MessagePart::Text { text: full_text });
        }
        if parts.is_empty() {
            warn!(%chat_id, "no assistant message found in model response");
            return;
        }

        let assistant = Message {
            id: Uuid::new_v4(),
            chat_id,
            role: Role::Assistant,
            parts,
            attachments: Vec::new(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.save_message(&assistant).await {
            // Non-fatal: the user already has the streamed content, only
            // durable history is incomplete.
            error!(error = %e, %chat_id, "failed to save assistant message");
        }
    }

    /// Delete a chat and its messages. Authorization and ownership checks
    /// mirror the turn path.
    pub async fn delete_chat(&self, user_id: Option<&str>, chat_id: Uuid) -> Result<(), TurnError> {
        let user_id = user_id.ok_or(TurnError::Unauthorized)?;
        let chat = self.store.chat(chat_id).await?.ok_or(TurnError::NotFound)?;
        if chat.user_id != user_id {
            return Err(TurnError::Unauthorized);
        }
        self.store.delete_chat(chat_id).await?;
        info!(%chat_id, "deleted chat");
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }
}

fn joined_text(message: &TurnMessage) -> String {
    message
        .parts
        .iter()
        .filter_map(MessagePart::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_provider_message(message: &TurnMessage) -> ProviderMessage {
    let text = joined_text(message);
    match message.role {
        Role::User => ProviderMessage::user(text),
        Role::Assistant => ProviderMessage::assistant(text),
    }
}
