//! Data transfer objects for HTTP message serialization.

use parley_core::{ApiKey, ChatMessage};
use serde::{Deserialize, Serialize};

// === Chat Types ===

/// Request body for creating a chat.
#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub model_id: String,
}

/// Response carrying a newly created id.
#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTitleRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectModelRequest {
    pub model_id: String,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// === Message Types ===

/// Request body for sending a message.
///
/// `api_key` is used for this generation only and never stored.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub api_key: ApiKey,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// Response from an accepted send: the assistant placeholder to watch.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
}

// === Model Management Types ===

/// Request body for registering a model.
#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub provider: String,
    pub model_id: String,
    pub api_key_env_var: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Partial update of a model; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateModelRequest {
    pub name: Option<String>,
    pub provider: Option<String>,
    pub model_id: Option<String>,
    pub api_key_env_var: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub is_restricted: Option<bool>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

// === Log Types ===

/// Query params for log listings.
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(rename = "type")]
    pub log_type: Option<String>,
    pub limit: Option<u32>,
}

// === Change Feed ===

/// Terminal state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Completed,
    Failed,
}

/// One change on the message feed, delivered to `/chats/{id}/events` subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// A user message or assistant placeholder was inserted.
    Created { chat_id: String, message: ChatMessage },
    /// One fragment was appended to a message.
    Appended {
        chat_id: String,
        message_id: String,
        fragment: String,
        content_len: usize,
    },
    /// Generation for a placeholder reached a terminal state.
    Finished {
        chat_id: String,
        message_id: String,
        status: GenerationStatus,
    },
}

impl MessageEvent {
    pub fn chat_id(&self) -> &str {
        match self {
            MessageEvent::Created { chat_id, .. }
            | MessageEvent::Appended { chat_id, .. }
            | MessageEvent::Finished { chat_id, .. } => chat_id,
        }
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageEvent::Created { .. } => "created",
            MessageEvent::Appended { .. } => "appended",
            MessageEvent::Finished { .. } => "finished",
        }
    }
}
