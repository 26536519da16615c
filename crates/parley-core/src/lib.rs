//! Core domain types and error definitions for parley.
//!
//! This crate provides the fundamental types shared across the workspace:
//!
//! - [`ChatError`] — Error taxonomy for chat, provider and storage operations
//! - [`Provider`] — Tag identifying which vendor adapter handles a model
//! - [`Message`] and [`MessageRole`] — Conversation turns sent to a provider
//! - [`Chat`], [`ChatMessage`], [`ModelDescriptor`], [`LogEntry`] — Persisted records
//! - [`ApiKey`] — Caller-supplied credential that never prints its value
//!
//! # Example
//!
//! ```rust
//! use parley_core::{Message, MessageRole, Provider};
//!
//! let msg = Message::user("Hello!");
//! assert_eq!(msg.role, MessageRole::User);
//!
//! let provider: Provider = "anthropic".parse().unwrap();
//! assert_eq!(provider, Provider::Anthropic);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod records;

pub use records::{Chat, ChatMessage, LogEntry, LogType, ModelDescriptor};

/// Errors that can occur while generating, routing or persisting chat messages.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Vendor API answered with a non-success status.
    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },

    /// Connection or body read failed before a status was available.
    #[error("LLM request failed: {0}")]
    Transport(String),

    /// Failed to parse a non-streaming provider response.
    #[error("Failed to parse provider response: {0}")]
    ParseError(String),

    /// Provider adapters require at least one conversation turn.
    #[error("Conversation has no messages")]
    EmptyConversation,

    /// No credential was supplied for the provider.
    #[error("API key not found for provider {0}")]
    MissingCredential(Provider),

    /// Provider tag is not one of the known set.
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Request carried no caller identity.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Caller does not own the target resource or lacks the privilege.
    #[error("Access denied")]
    Forbidden,

    /// Chat does not exist.
    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    /// Some other record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request payload failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The background generation worker is gone.
    #[error("Generation queue is closed")]
    QueueClosed,
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::ParseError(err.to_string())
    }
}

impl ChatError {
    /// Fixed text written into an assistant message when generation fails.
    ///
    /// Vendor payloads never reach the user; they stay in server logs.
    pub fn user_notice(&self) -> &'static str {
        match self {
            ChatError::Api { .. } | ChatError::Transport(_) => {
                "Error: Failed to connect to the AI service. Please check your API key and try again."
            }
            ChatError::MissingCredential(_) => {
                "Error: API key not configured. Please provide an API key for this model."
            }
            ChatError::UnsupportedProvider(_) => {
                "Error: Unsupported AI model provider. Please contact support."
            }
            ChatError::ChatNotFound(_) => "Error: Chat not found.",
            _ => "Sorry, I encountered an error while generating a response.",
        }
    }
}

/// Vendor whose adapter serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Google,
    HuggingFace,
}

impl Provider {
    /// Every known provider, in routing-table order.
    pub const ALL: [Provider; 4] = [
        Provider::OpenAI,
        Provider::Anthropic,
        Provider::Google,
        Provider::HuggingFace,
    ];

    /// Lowercase tag as stored on model descriptors.
    pub fn tag(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::HuggingFace => "huggingface",
        }
    }

    /// Display name used in log lines and error messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google AI",
            Provider::HuggingFace => "Hugging Face",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Provider {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.tag() == s)
            .ok_or_else(|| ChatError::UnsupportedProvider(s.to_string()))
    }
}

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the assistant/LLM.
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ChatError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// A single turn in the conversation handed to a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The content of the message.
    pub content: String,
}

impl Message {
    /// Creates a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    /// Creates a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Opaque bearer credential for a vendor API.
///
/// `Debug` is redacted so the key cannot leak through `tracing` fields.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw value, for request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Base URLs for each vendor API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub anthropic: String,
    pub google: String,
    pub huggingface: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: "https://api.openai.com".into(),
            anthropic: "https://api.anthropic.com".into(),
            google: "https://generativelanguage.googleapis.com".into(),
            huggingface: "https://api-inference.huggingface.co".into(),
        }
    }
}

impl ProviderEndpoints {
    /// Points every provider at the same base, for tests against a local mock.
    pub fn all(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            openai: base.clone(),
            anthropic: base.clone(),
            google: base.clone(),
            huggingface: base,
        }
    }

    /// Base URL for the given provider, without a trailing slash.
    pub fn base_for(&self, provider: Provider) -> &str {
        let base = match provider {
            Provider::OpenAI => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
            Provider::HuggingFace => &self.huggingface,
        };
        base.trim_end_matches('/')
    }
}

/// Current UTC time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
