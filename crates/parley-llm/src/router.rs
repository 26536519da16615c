//! Model id to provider resolution.
//!
//! Rules are checked in order; the first matching prefix wins. Anything that
//! matches no rule falls back to Hugging Face, whose inference API accepts
//! arbitrary repository names.

use parley_core::Provider;

/// Ordered prefix rules.
pub const ROUTES: &[(&str, Provider)] = &[
    ("gpt-", Provider::OpenAI),
    ("o1-", Provider::OpenAI),
    ("o2-", Provider::OpenAI),
    ("o3-", Provider::OpenAI),
    ("claude-", Provider::Anthropic),
    ("gemini-", Provider::Google),
];

/// Provider used when no prefix matches.
pub const FALLBACK: Provider = Provider::HuggingFace;

/// Resolves the provider for a vendor model id. Total over all inputs.
pub fn resolve(model_id: &str) -> Provider {
    ROUTES
        .iter()
        .find(|(prefix, _)| model_id.starts_with(prefix))
        .map(|(_, provider)| *provider)
        .unwrap_or(FALLBACK)
}
