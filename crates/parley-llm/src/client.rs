//! Shared adapter contract: request shape, fragment stream and HTTP helpers.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use parley_core::{ApiKey, ChatError, Message, Provider, ProviderEndpoints};
use tracing::error;

use crate::anthropic::AnthropicClient;
use crate::google::GoogleClient;
use crate::huggingface::HuggingFaceClient;
use crate::openai::OpenAiClient;

/// Token limit used when the model descriptor does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// A finite, single-consumer stream of generated text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Normalized generation request handed to every adapter.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Vendor model identifier, passed through unvalidated.
    pub model: String,
    /// Conversation turns in order; must not be empty.
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    /// `None` leaves the vendor default (Google and Hugging Face use 0.7).
    pub temperature: Option<f32>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub(crate) fn ensure_non_empty(&self) -> Result<(), ChatError> {
        match self.messages.is_empty() {
            true => Err(ChatError::EmptyConversation),
            false => Ok(()),
        }
    }
}

/// One vendor adapter.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// The provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Sends the request and returns the vendor's answer as text fragments.
    ///
    /// A non-success status fails here, before any fragment is produced.
    async fn stream(&self, credential: &ApiKey, request: &ProviderRequest) -> Result<FragmentStream, ChatError>;
}

/// Builds the adapter for `provider`, pointed at the configured base URL.
pub fn client_for(provider: Provider, endpoints: &ProviderEndpoints) -> Box<dyn ChatProvider> {
    let base = endpoints.base_for(provider);
    match provider {
        Provider::OpenAI => Box::new(OpenAiClient::new(base)),
        Provider::Anthropic => Box::new(AnthropicClient::new(base)),
        Provider::Google => Box::new(GoogleClient::new(base)),
        Provider::HuggingFace => Box::new(HuggingFaceClient::new(base)),
    }
}

/// Maps a reqwest failure to a transport error without echoing the URL.
///
/// Google carries the credential in the query string.
pub(crate) fn transport_err(e: reqwest::Error) -> ChatError {
    ChatError::Transport(e.without_url().to_string())
}

/// Passes a successful response through, or converts it into `ChatError::Api`.
pub(crate) async fn ensure_success(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = vendor_error_message(&body).unwrap_or_else(|| match body.trim() {
        "" => status.canonical_reason().unwrap_or("request failed").to_string(),
        trimmed => trimmed.to_string(),
    });

    error!(provider = provider.tag(), status = status.as_u16(), "{} API error: {}", provider, message);
    Err(ChatError::Api { provider, status: status.as_u16(), message })
}

/// Pulls `error.message` (or a bare `error` string) out of a vendor error body.
pub(crate) fn vendor_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => other.get("message")?.as_str().map(String::from),
    }
}
