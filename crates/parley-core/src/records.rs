//! Persisted records: chats, messages, model descriptors and log entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ChatError, MessageRole, Provider};

/// A conversation owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// Vendor model identifier currently selected for this chat.
    pub model_id: String,
    pub is_archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Chat {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// A message row within a chat.
///
/// Assistant rows start empty and grow while generation is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Author; `None` for assistant messages.
    pub user_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Configuration for a selectable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    pub provider: Provider,
    /// The vendor's model identifier (e.g. "gpt-4", "claude-3-sonnet").
    pub model_id: String,
    /// Name of the credential variable users are told to supply.
    pub api_key_env_var: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_restricted: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Category of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Error,
    UserAction,
    AdminAction,
}

impl LogType {
    pub fn as_str(self) -> &'static str {
        match self {
            LogType::Error => "error",
            LogType::UserAction => "user_action",
            LogType::AdminAction => "admin_action",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogType {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "user_action" => Ok(Self::UserAction),
            "admin_action" => Ok(Self::AdminAction),
            other => Err(ChatError::InvalidInput(format!("unknown log type '{other}'"))),
        }
    }
}

/// Append-only audit/error record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub timestamp: i64,
    pub user_id: Option<String>,
    pub details: serde_json::Value,
}
