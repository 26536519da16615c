//! Google Generative Language adapter (`streamGenerateContent` over SSE).
//!
//! The API has no user/assistant role model here, so every turn is flattened
//! to `"<role>: <text>"` and sent as one part of a single content entry.

use async_trait::async_trait;
use futures::StreamExt;
use parley_core::{ApiKey, ChatError, Message, Provider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::{ensure_success, transport_err, ChatProvider, FragmentStream, ProviderRequest};
use crate::sse::{self, FrameError};

const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

/// Serializes each turn as one `"<role>: <text>"` part.
fn role_prefixed_parts(messages: &[Message]) -> Vec<Part> {
    messages
        .iter()
        .map(|m| Part {
            text: format!("{}: {}", m.role.as_str(), m.content),
        })
        .collect()
}

fn extract_text(data: &str) -> Result<Option<String>, FrameError> {
    let response: GenerateResponse = serde_json::from_str(data)?;
    Ok(response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text))
}

/// Client for Google's Gemini models.
pub struct GoogleClient {
    client: Client,
    api_base: String,
}

impl GoogleClient {
    pub fn new(api_base: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for GoogleClient {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn stream(&self, credential: &ApiKey, request: &ProviderRequest) -> Result<FragmentStream, ChatError> {
        request.ensure_non_empty()?;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: role_prefixed_parts(&request.messages),
            }],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            },
        };

        // The key travels in the query string; never log the full URL.
        info!("Google: model={}, turns={}", request.model, request.messages.len());

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:streamGenerateContent",
                self.api_base, request.model
            ))
            .query(&[("alt", "sse"), ("key", credential.expose())])
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;

        let response = ensure_success(Provider::Google, response).await?;
        let frames = sse::data_frames(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(reqwest::Error::without_url)),
        );

        Ok(sse::fragment_stream(Provider::Google, frames, extract_text))
    }
}
