//! Anthropic Messages API adapter with SSE streaming.

use async_trait::async_trait;
use futures::StreamExt;
use parley_core::{ApiKey, ChatError, Provider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::{ensure_success, transport_err, ChatProvider, FragmentStream, ProviderRequest};
use crate::sse::{self, FrameError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    delta: Option<ContentBlockDelta>,
    error: Option<StreamError>,
}

fn extract_delta(data: &str) -> Result<Option<String>, FrameError> {
    let event: StreamEvent = serde_json::from_str(data)?;

    if event.event_type.as_deref() == Some("error") {
        let message = event
            .error
            .and_then(|e| e.message)
            .unwrap_or_else(|| "stream error".to_string());
        return Err(FrameError::Vendor(ChatError::Transport(format!(
            "Anthropic stream error: {}",
            message
        ))));
    }

    Ok(event.delta.and_then(|d| d.text))
}

/// Client for Anthropic's Claude API.
pub struct AnthropicClient {
    client: Client,
    api_base: String,
}

impl AnthropicClient {
    /// Creates a new Anthropic client for the given API base.
    pub fn new(api_base: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn stream(&self, credential: &ApiKey, request: &ProviderRequest) -> Result<FragmentStream, ChatError> {
        request.ensure_non_empty()?;

        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            messages: request
                .messages
                .iter()
                .map(|msg| AnthropicMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                })
                .collect(),
            temperature: request.temperature,
            stream: true,
        };

        info!("Anthropic: model={}, messages={}", request.model, request.messages.len());

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;

        let response = ensure_success(Provider::Anthropic, response).await?;
        let frames = sse::data_frames(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(reqwest::Error::without_url)),
        );

        Ok(sse::fragment_stream(Provider::Anthropic, frames, extract_delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Message;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EVENTS: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Bonjour\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" !\"}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    #[tokio::test]
    async fn sends_version_header_and_reads_delta_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-3-sonnet",
                "stream": true,
                "max_tokens": 1024,
                "messages": [{ "role": "user", "content": "Salut" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(EVENTS, "text/event-stream"))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&server.uri());
        let request = ProviderRequest::new("claude-3-sonnet", vec![Message::user("Salut")]);
        let stream = client.stream(&ApiKey::new("ak-test"), &request).await.unwrap();
        let text: String = stream.map(|f| f.unwrap()).collect::<Vec<_>>().await.concat();
        assert_eq!(text, "Bonjour !");
    }

    #[tokio::test]
    async fn error_event_fails_the_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"partial\"}}\n\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&server.uri());
        let request = ProviderRequest::new("claude-3-sonnet", vec![Message::user("Hi")]);
        let items: Vec<_> = client.stream(&ApiKey::new("k"), &request).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(&items[1], Err(ChatError::Transport(msg)) if msg.contains("Overloaded")));
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": { "type": "overloaded_error", "message": "Overloaded" }
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&server.uri());
        let request = ProviderRequest::new("claude-3-sonnet", vec![Message::user("Hi")]);
        match client.stream(&ApiKey::new("k"), &request).await {
            Err(ChatError::Api { status, message, .. }) => {
                assert_eq!(status, 529);
                assert_eq!(message, "Overloaded");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected an API error"),
        }
    }
}
