//! Language-model provider client.
//!
//! [`LanguageModel`] is the seam between the turn orchestrator and the
//! hosted provider: production uses an OpenAI-compatible chat-completions
//! client streaming over SSE, tests use scripted fakes. The word smoother
//! re-chunks raw deltas at word boundaries before they are forwarded to
//! the browser.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::TurnError;

/// A tool offered to the model: name, description, JSON-schema parameters.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One message in provider wire shape. Assistant tool-call messages carry
/// `tool_calls`; tool-result messages carry `tool_call_id`.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: &'static str,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Value>,
}

impl ProviderMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Value) -> Self {
        Self {
            role: "assistant",
            content: String::new(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool",
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    fn to_wire(&self) -> Value {
        let mut obj = json!({ "role": self.role, "content": self.content });
        if let Some(id) = &self.tool_call_id {
            obj["tool_call_id"] = json!(id);
        }
        if let Some(calls) = &self.tool_calls {
            obj["tool_calls"] = calls.clone();
        }
        obj
    }
}

/// One model invocation: upstream model name, system prompt, history, tools.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolSpec>,
}

/// A completed tool call assembled from streamed fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Ordered events observed on a model response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    /// The model stopped to call tools; the caller runs them and re-invokes.
    ToolCalls(Vec<ToolCall>),
    Done,
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, TurnError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Invoke the model, returning its ordered delta stream.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ModelStream, TurnError>;

    /// One-shot completion (title generation, suggestions).
    async fn complete(&self, model: &str, system: &str, prompt: &str)
        -> Result<String, TurnError>;

    /// Derive a chat title from the first user message.
    async fn generate_title(&self, user_text: &str) -> Result<String, TurnError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible implementation
// ---------------------------------------------------------------------------

pub struct OpenAiCompatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    title_model: String,
}

impl OpenAiCompatModel {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
            title_model: config.llm_title_model.clone(),
        }
    }

    fn request_body(request: &ChatRequest, stream: bool) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(request.messages.iter().map(ProviderMessage::to_wire));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response, TurnError> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| TurnError::Stream(format!("provider request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "model provider returned an error");
            return Err(TurnError::Stream(format!(
                "provider returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ModelStream, TurnError> {
        let response = self.post(Self::request_body(&request, true)).await?;

        let (tx, rx) = mpsc::channel::<Result<ModelEvent, TurnError>>(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buf = String::new();
            let mut assembler = ToolCallAssembler::default();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(TurnError::Stream(format!("stream read failed: {e}"))))
                            .await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    let line = line.trim();
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    for event in parse_sse_data(data, &mut assembler) {
                        if tx.send(Ok(event)).await.is_err() {
                            // Client gone; abandon the provider stream.
                            return;
                        }
                    }
                }
            }

            if let Some(calls) = assembler.finish() {
                if tx.send(Ok(ModelEvent::ToolCalls(calls))).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(ModelEvent::Done)).await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn complete(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
    ) -> Result<String, TurnError> {
        let request = ChatRequest {
            model: model.to_string(),
            system: system.to_string(),
            messages: vec![ProviderMessage::user(prompt)],
            tools: vec![],
        };
        let response = self.post(Self::request_body(&request, false)).await?;
        let payload: CompletionPayload = response
            .json()
            .await
            .map_err(|e| TurnError::Stream(format!("invalid provider response: {e}")))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TurnError::Stream("provider returned no completion".to_string()))
    }

    async fn generate_title(&self, user_text: &str) -> Result<String, TurnError> {
        let title = self
            .complete(&self.title_model, crate::prompts::TITLE_PROMPT, user_text)
            .await?;
        let title = title.trim().trim_matches('"').to_string();
        Ok(title.chars().take(80).collect())
    }
}

// ---------------------------------------------------------------------------
// SSE chunk parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionPayload {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Accumulates tool-call fragments across chunks. The provider streams
/// name and argument text incrementally, keyed by call index.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    calls: Vec<(String, String, String)>, // (id, name, raw arguments)
}

impl ToolCallAssembler {
    fn absorb(&mut self, fragment: ChunkToolCall) {
        while self.calls.len() <= fragment.index {
            self.calls.push(Default::default());
        }
        let slot = &mut self.calls[fragment.index];
        if let Some(id) = fragment.id {
            slot.0 = id;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                slot.1.push_str(&name);
            }
            if let Some(args) = function.arguments {
                slot.2.push_str(&args);
            }
        }
    }

    fn finish(&mut self) -> Option<Vec<ToolCall>> {
        if self.calls.is_empty() {
            return None;
        }
        let calls = std::mem::take(&mut self.calls)
            .into_iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, raw_args)| {
                let arguments = serde_json::from_str(&raw_args).unwrap_or_else(|e| {
                    warn!(error = %e, tool = %name, "tool arguments were not valid JSON");
                    Value::Null
                });
                ToolCall {
                    id,
                    name,
                    arguments,
                }
            })
            .collect::<Vec<_>>();
        (!calls.is_empty()).then_some(calls)
    }
}

fn parse_sse_data(data: &str, assembler: &mut ToolCallAssembler) -> Vec<ModelEvent> {
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "skipping unparseable stream chunk");
            return vec![];
        }
    };

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push(ModelEvent::TextDelta(content));
            }
        }
        if let Some(fragments) = choice.delta.tool_calls {
            for fragment in fragments {
                assembler.absorb(fragment);
            }
        }
        if choice.finish_reason.as_deref() == Some("tool_calls") {
            if let Some(calls) = assembler.finish() {
                events.push(ModelEvent::ToolCalls(calls));
            }
        }
    }
    events
}

// ---------------------------------------------------------------------------
// Word-level smoothing
// ---------------------------------------------------------------------------

/// Re-chunks streamed text at word boundaries: a chunk is released once
/// the text after it has moved past a whitespace run, so the client never
/// receives a split word. Concatenating everything emitted (plus the final
/// flush) always reproduces the input exactly.
#[derive(Debug, Default)]
pub struct WordSmoother {
    buf: String,
}

impl WordSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a raw delta, returning any text that is now safe to emit.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.buf.push_str(delta);
        let cut = self
            .buf
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .next_back()?;
        let rest = self.buf.split_off(cut);
        Some(std::mem::replace(&mut self.buf, rest))
    }

    /// Emit whatever is still buffered at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}
