//! OpenAI chat-completions adapter with SSE streaming.
//!
//! The request body is built with `async-openai` types; the response stream is
//! read directly so malformed frames can be skipped instead of aborting.

use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures::StreamExt;
use parley_core::{ApiKey, ChatError, Message, MessageRole, Provider};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::client::{ensure_success, transport_err, ChatProvider, FragmentStream, ProviderRequest};
use crate::sse::{self, FrameError};

/// Request field carrying the output token limit.
///
/// Reasoning models reject `max_tokens` and take `max_completion_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimitField {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenLimitField {
    pub fn for_model(model: &str) -> Self {
        match model.starts_with("o3-") {
            true => TokenLimitField::MaxCompletionTokens,
            false => TokenLimitField::MaxTokens,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenLimitField::MaxTokens => "max_tokens",
            TokenLimitField::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

#[derive(Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

fn llm_err(e: impl ToString) -> ChatError {
    ChatError::InvalidInput(e.to_string())
}

fn to_openai_message(msg: &Message) -> Result<ChatCompletionRequestMessage, ChatError> {
    Ok(match msg.role {
        MessageRole::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map_err(llm_err)?,
        ),
        MessageRole::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map_err(llm_err)?,
        ),
    })
}

/// Builds the streaming request body, choosing the token-limit field by model.
#[allow(deprecated)]
pub(crate) fn build_request(request: &ProviderRequest) -> Result<CreateChatCompletionRequest, ChatError> {
    let messages = request
        .messages
        .iter()
        .map(to_openai_message)
        .collect::<Result<Vec<_>, _>>()?;

    let field = TokenLimitField::for_model(&request.model);
    let mut builder = CreateChatCompletionRequestArgs::default();
    builder.model(&request.model).messages(messages).stream(true);

    match field {
        TokenLimitField::MaxTokens => {
            builder.max_tokens(request.max_tokens);
            if let Some(temperature) = request.temperature {
                builder.temperature(temperature);
            }
        }
        TokenLimitField::MaxCompletionTokens => {
            builder.max_completion_tokens(request.max_tokens);
        }
    }

    builder.build().map_err(llm_err)
}

fn extract_delta(data: &str) -> Result<Option<String>, FrameError> {
    let frame: StreamFrame = serde_json::from_str(data)?;
    Ok(frame.choices.into_iter().next().and_then(|c| c.delta.content))
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiClient {
    client: Client,
    api_base: String,
}

impl OpenAiClient {
    /// Creates a client for the given API base (e.g. `https://api.openai.com`).
    pub fn new(api_base: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn stream(&self, credential: &ApiKey, request: &ProviderRequest) -> Result<FragmentStream, ChatError> {
        request.ensure_non_empty()?;
        let body = build_request(request)?;

        info!(
            "OpenAI: model={}, messages={}, limit_field={}",
            request.model,
            request.messages.len(),
            TokenLimitField::for_model(&request.model).as_str()
        );

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base))
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;

        let response = ensure_success(Provider::OpenAI, response).await?;
        let frames = sse::data_frames(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(reqwest::Error::without_url)),
        );

        Ok(sse::fragment_stream(Provider::OpenAI, frames, extract_delta))
    }
}
