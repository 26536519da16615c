//! Unified LLM client that routes to the appropriate provider based on model name.

use parley_core::{ApiKey, ChatError, Provider, ProviderEndpoints};

use crate::client::{client_for, ChatProvider, FragmentStream, ProviderRequest};
use crate::router;

/// Routes requests to the adapter resolved from the model id.
///
/// The provider is resolved once, at construction.
pub struct UnifiedLlmClient {
    model: String,
    provider: Provider,
    inner: Box<dyn ChatProvider>,
}

impl UnifiedLlmClient {
    /// Creates a new unified client, detecting provider from model name.
    pub fn new(model: &str, endpoints: &ProviderEndpoints) -> Self {
        let provider = router::resolve(model);
        Self {
            model: model.to_string(),
            provider,
            inner: client_for(provider, endpoints),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Streams a reply; `request.model` is overwritten with this client's model.
    pub async fn stream(&self, credential: &ApiKey, request: ProviderRequest) -> Result<FragmentStream, ChatError> {
        if credential.is_blank() {
            return Err(ChatError::MissingCredential(self.provider));
        }
        let request = ProviderRequest {
            model: self.model.clone(),
            ..request
        };
        self.inner.stream(credential, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_core::Message;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn resolves_provider_once_from_model_name() {
        let endpoints = ProviderEndpoints::default();
        assert_eq!(UnifiedLlmClient::new("gemini-pro", &endpoints).provider(), Provider::Google);
        assert_eq!(UnifiedLlmClient::new("phi-2", &endpoints).provider(), Provider::HuggingFace);
    }

    #[tokio::test]
    async fn blank_credential_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = UnifiedLlmClient::new("gpt-4", &ProviderEndpoints::all(server.uri()));
        let request = ProviderRequest::new("ignored", vec![Message::user("Hi")]);
        assert!(matches!(
            client.stream(&ApiKey::new(""), request).await,
            Err(ChatError::MissingCredential(Provider::OpenAI))
        ));
    }

    #[tokio::test]
    async fn dispatches_to_the_resolved_adapter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/codellama"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "generated_text": "fn main() {}" }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = UnifiedLlmClient::new("codellama", &ProviderEndpoints::all(server.uri()));
        let request = ProviderRequest::new("ignored", vec![Message::user("Write main")]);
        let fragments: Vec<String> = client
            .stream(&ApiKey::new("hf"), request)
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["fn main() {}"]);
    }
}
