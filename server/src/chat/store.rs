//! Chat and message persistence.
//!
//! [`ChatStore`] is the orchestrator's seam to durable history; the SQLite
//! implementation stores ids as TEXT and parts/attachments as JSON
//! columns. Message rows are written once and never updated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use shared_types::{Attachment, Chat, ChatVisibility, Message, MessagePart, Role};

use crate::error::TurnError;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn chat(&self, id: Uuid) -> Result<Option<Chat>, TurnError>;
    async fn create_chat(&self, chat: &Chat) -> Result<(), TurnError>;
    async fn chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>, TurnError>;
    async fn save_message(&self, message: &Message) -> Result<(), TurnError>;
    async fn messages(&self, chat_id: Uuid) -> Result<Vec<Message>, TurnError>;
    /// Remove the chat and its messages. Ok(false) when the chat is absent.
    async fn delete_chat(&self, id: Uuid) -> Result<bool, TurnError>;
}

pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: String,
    user_id: String,
    title: String,
    visibility: String,
    created_at: String,
}

impl ChatRow {
    fn into_chat(self) -> Result<Chat, TurnError> {
        Ok(Chat {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            title: self.title,
            visibility: match self.visibility.as_str() {
                "public" => ChatVisibility::Public,
                _ => ChatVisibility::Private,
            },
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    role: String,
    parts: String,
    attachments: String,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, TurnError> {
        Ok(Message {
            id: parse_uuid(&self.id)?,
            chat_id: parse_uuid(&self.chat_id)?,
            role: match self.role.as_str() {
                "assistant" => Role::Assistant,
                _ => Role::User,
            },
            parts: serde_json::from_str::<Vec<MessagePart>>(&self.parts)
                .map_err(|e| decode_error("parts", e))?,
            attachments: serde_json::from_str::<Vec<Attachment>>(&self.attachments)
                .map_err(|e| decode_error("attachments", e))?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, TurnError> {
    Uuid::parse_str(raw).map_err(|e| decode_error("uuid", e))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TurnError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error("timestamp", e))
}

fn decode_error(what: &str, e: impl std::fmt::Display) -> TurnError {
    TurnError::Store(sqlx::Error::Decode(
        format!("invalid {what} column: {e}").into(),
    ))
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn chat(&self, id: Uuid) -> Result<Option<Chat>, TurnError> {
        let row: Option<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, title, visibility, created_at FROM chats WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ChatRow::into_chat).transpose()
    }

    async fn create_chat(&self, chat: &Chat) -> Result<(), TurnError> {
        sqlx::query(
            "INSERT INTO chats (id, user_id, title, visibility, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chat.id.to_string())
        .bind(&chat.user_id)
        .bind(&chat.title)
        .bind(match chat.visibility {
            ChatVisibility::Public => "public",
            ChatVisibility::Private => "private",
        })
        .bind(chat.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>, TurnError> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, title, visibility, created_at
             FROM chats WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChatRow::into_chat).collect()
    }

    async fn save_message(&self, message: &Message) -> Result<(), TurnError> {
        let parts = serde_json::to_string(&message.parts)
            .map_err(|e| decode_error("parts", e))?;
        let attachments = serde_json::to_string(&message.attachments)
            .map_err(|e| decode_error("attachments", e))?;

        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, parts, attachments, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.chat_id.to_string())
        .bind(message.role.as_str())
        .bind(parts)
        .bind(attachments)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn messages(&self, chat_id: Uuid) -> Result<Vec<Message>, TurnError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, role, parts, attachments, created_at
             FROM messages WHERE chat_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(chat_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    async fn delete_chat(&self, id: Uuid) -> Result<bool, TurnError> {
        // messages go with the chat via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
