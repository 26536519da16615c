//! Hugging Face Inference API adapter.
//!
//! Single-shot: the conversation is flattened into one prompt and the
//! generated text comes back whole, as a stream of exactly one fragment.

use async_trait::async_trait;
use parley_core::{ApiKey, ChatError, Message, Provider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::{ensure_success, transport_err, ChatProvider, FragmentStream, ProviderRequest};

const MAX_NEW_TOKENS: u32 = 250;
const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Serialize)]
struct InferenceRequest {
    inputs: String,
    parameters: InferenceParameters,
}

#[derive(Deserialize)]
struct Generation {
    generated_text: String,
}

/// Joins message contents with newlines, dropping roles.
fn flatten_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Client for models served by the Hugging Face Inference API.
pub struct HuggingFaceClient {
    client: Client,
    api_base: String,
}

impl HuggingFaceClient {
    pub fn new(api_base: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Runs the inference call and returns the whole generated text.
    pub async fn generate(&self, credential: &ApiKey, request: &ProviderRequest) -> Result<String, ChatError> {
        request.ensure_non_empty()?;

        let body = InferenceRequest {
            inputs: flatten_prompt(&request.messages),
            parameters: InferenceParameters {
                max_new_tokens: MAX_NEW_TOKENS,
                temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                return_full_text: false,
            },
        };

        info!("Hugging Face: model={}, turns={}", request.model, request.messages.len());

        let response = self
            .client
            .post(format!("{}/models/{}", self.api_base, request.model))
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;

        let response = ensure_success(Provider::HuggingFace, response).await?;
        let text = response.text().await.map_err(transport_err)?;

        let generations: Vec<Generation> = serde_json::from_str(&text)?;
        generations
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| ChatError::ParseError("Hugging Face returned no generations".into()))
    }
}

#[async_trait]
impl ChatProvider for HuggingFaceClient {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    async fn stream(&self, credential: &ApiKey, request: &ProviderRequest) -> Result<FragmentStream, ChatError> {
        let text = self.generate(credential, request).await?;
        Ok(Box::pin(futures::stream::once(futures::future::ready(Ok(text)))))
    }
}
