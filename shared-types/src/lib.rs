//! Shared types between frontend and backend
//!
//! These types cross the HTTP boundary as JSON: chat turn submissions,
//! persisted messages, streamed response events, search results, and the
//! advisory diagnostics payloads. Field casing matches what the browser
//! client sends and expects (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Messages
// ============================================================================

/// Who authored a message within a chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One content part of a message. A message is an ordered sequence of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        reasoning: String,
    },
    /// A tool round-trip the assistant performed while producing this message.
    ToolInvocation {
        #[serde(rename = "toolName")]
        tool_name: String,
        args: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

impl MessagePart {
    /// The text content of this part, if it is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A file the user attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub content_type: String,
}

/// A persisted chat message. Immutable once written; exactly one row is
/// written per turn per role-slot (the inbound user message, then the
/// reconciled assistant reply).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Chats
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatVisibility {
    Private,
    Public,
}

/// A chat record. Created lazily on the first turn; the title is derived
/// from the first user message. Only the owning user may read, extend, or
/// delete it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub visibility: ChatVisibility,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Turn submission
// ============================================================================

/// A message as submitted by the client within a turn. Carries no chat id;
/// the turn's chat id applies to every message in the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnMessage {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Body of `POST /api/chat`: one user-submission-to-assistant-response cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    /// Chat identifier. May reference a chat that does not exist yet.
    pub id: Uuid,
    /// Full ordered history including the newly submitted user message.
    pub messages: Vec<TurnMessage>,
    pub selected_chat_model: String,
}

// ============================================================================
// Streamed response events
// ============================================================================

/// One event on the turn's response stream, written as newline-delimited
/// JSON. Failures after streaming has begun arrive as `Error` events; the
/// HTTP status has already committed to 200 by then.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        delta: String,
    },
    /// Sanitized artifact content so far, re-emitted per generation delta.
    CodeDelta {
        #[serde(rename = "documentId")]
        document_id: Uuid,
        content: String,
    },
    ToolCall {
        #[serde(rename = "toolName")]
        tool_name: String,
        args: serde_json::Value,
    },
    ToolResult {
        #[serde(rename = "toolName")]
        tool_name: String,
        result: serde_json::Value,
    },
    Error {
        message: String,
    },
    Finish,
}

// ============================================================================
// Web search
// ============================================================================

/// A single web search result. Lists of these are never empty: provider
/// failures are carried as synthetic records so the condition is visible
/// inline instead of silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Validation state of a single configured credential. The secret value
/// itself never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCheck {
    pub exists: bool,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `GET /api/config/search-status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub is_valid: bool,
    pub api_key: CredentialCheck,
    pub search_engine_id: CredentialCheck,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticStatus {
    Ok,
    Warning,
    Error,
}

/// One named check from the search diagnostics run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticCheck {
    pub name: String,
    pub status: DiagnosticStatus,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_part_roundtrips_tagged_json() {
        let part = MessagePart::Text {
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");
        let back: MessagePart = serde_json::from_value(json).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn turn_request_accepts_camel_case() {
        let raw = serde_json::json!({
            "id": "6d9c2f7a-52c1-4ac5-9d0a-6a1d6f9a2b3c",
            "messages": [{
                "id": "0d9c2f7a-52c1-4ac5-9d0a-6a1d6f9a2b3c",
                "role": "user",
                "parts": [{"type": "text", "text": "hi"}]
            }],
            "selectedChatModel": "chat-model"
        });
        let req: ChatTurnRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.selected_chat_model, "chat-model");
        assert_eq!(req.messages.len(), 1);
        assert!(req.messages[0].attachments.is_empty());
    }

    #[test]
    fn stream_event_uses_kebab_case_tags() {
        let event = StreamEvent::TextDelta {
            delta: "Hi ".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text-delta");
    }
}
