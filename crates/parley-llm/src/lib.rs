//! LLM provider adapters for OpenAI, Anthropic, Google and Hugging Face.
//!
//! Every adapter turns a normalized [`ProviderRequest`] into one vendor HTTP
//! call and normalizes the answer into a [`FragmentStream`] of text pieces:
//!
//! - [`UnifiedLlmClient`] — Recommended: resolves the provider from the model id
//! - [`router::resolve`] — Ordered prefix table mapping model ids to providers
//! - [`client_for`] — Builds the adapter for a provider against configured endpoints
//! - [`OpenAiClient`], [`AnthropicClient`], [`GoogleClient`], [`HuggingFaceClient`]
//!
//! # Streaming
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use parley_core::{ApiKey, Message, ProviderEndpoints};
//! use parley_llm::{ProviderRequest, UnifiedLlmClient};
//!
//! let client = UnifiedLlmClient::new("claude-3-5-sonnet-latest", &ProviderEndpoints::default());
//! let request = ProviderRequest::new("claude-3-5-sonnet-latest", vec![Message::user("Hi")]);
//! let mut stream = client.stream(&ApiKey::new(key), request).await?;
//!
//! while let Some(fragment) = stream.next().await {
//!     print!("{}", fragment?);
//! }
//! ```
//!
//! Hugging Face is single-shot: its stream always carries exactly one fragment.

mod anthropic;
mod client;
mod google;
mod huggingface;
mod openai;
pub mod router;
pub mod sse;
mod unified;

pub use anthropic::AnthropicClient;
pub use client::{client_for, ChatProvider, FragmentStream, ProviderRequest, DEFAULT_MAX_TOKENS};
pub use google::GoogleClient;
pub use huggingface::HuggingFaceClient;
pub use openai::{OpenAiClient, TokenLimitField};
pub use parley_core::{ApiKey, ChatError, Message, MessageRole, Provider, ProviderEndpoints};
pub use unified::UnifiedLlmClient;
