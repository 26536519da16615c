//! Server settings and model catalog for parley.
//!
//! - [`ServerConfig`] — Bind address, database path, admin list and provider endpoints
//! - [`ModelCatalog`] — Model descriptors to seed, loaded from JSON
//!
//! # Loading
//!
//! ```rust,ignore
//! use parley_config::{ModelCatalog, ServerConfig};
//!
//! let config = ServerConfig::from_env()?;
//! let catalog = ModelCatalog::load_or_builtin(&config.models_file)?;
//! ```
//!
//! # Catalog format
//!
//! ```rust
//! use parley_config::ModelCatalog;
//!
//! let catalog = ModelCatalog::from_json(r#"[
//!     { "name": "GPT-4", "provider": "openai", "model_id": "gpt-4", "api_key_env_var": "OPENAI_API_KEY" }
//! ]"#).unwrap();
//! assert_eq!(catalog.models().len(), 1);
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::{Provider, ProviderEndpoints};
use serde::{Deserialize, Serialize};

/// Errors that can occur when loading settings or the model catalog.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse JSON configuration.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable held an unusable value.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    /// Catalog content failed validation.
    #[error("Invalid model catalog: {0}")]
    Validation(String),
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_DATABASE_URL: &str = "data/parley.db";
const DEFAULT_MODELS_FILE: &str = "models.json";
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime settings for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// SQLite path, or `:memory:`.
    pub database_url: String,
    /// User ids allowed to manage models and read all logs.
    pub admin_users: HashSet<String>,
    pub models_file: PathBuf,
    pub endpoints: ProviderEndpoints,
    /// Capacity of the message change feed.
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            database_url: DEFAULT_DATABASE_URL.into(),
            admin_users: HashSet::new(),
            models_file: PathBuf::from(DEFAULT_MODELS_FILE),
            endpoints: ProviderEndpoints::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let event_buffer = match get("PARLEY_EVENT_BUFFER") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "PARLEY_EVENT_BUFFER".into(),
                    value: raw,
                })?,
            None => defaults.event_buffer,
        };

        let admin_users = get("PARLEY_ADMIN_USERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let endpoints = ProviderEndpoints {
            openai: get("OPENAI_API_BASE").unwrap_or(defaults.endpoints.openai),
            anthropic: get("ANTHROPIC_API_BASE").unwrap_or(defaults.endpoints.anthropic),
            google: get("GOOGLE_API_BASE").unwrap_or(defaults.endpoints.google),
            huggingface: get("HUGGINGFACE_API_BASE").unwrap_or(defaults.endpoints.huggingface),
        };

        Ok(Self {
            bind_addr: get("PARLEY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            admin_users,
            models_file: get("PARLEY_MODELS_FILE").map(PathBuf::from).unwrap_or(defaults.models_file),
            endpoints,
            event_buffer,
        })
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.contains(user_id)
    }
}

/// One model entry in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSeed {
    pub name: String,
    pub provider: Provider,
    pub model_id: String,
    pub api_key_env_var: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_true() -> bool {
    true
}

impl ModelSeed {
    fn builtin(name: &str, provider: Provider, model_id: &str, env_var: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            provider,
            model_id: model_id.into(),
            api_key_env_var: env_var.into(),
            description: Some(description.into()),
            is_active: true,
            is_restricted: false,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Models seeded into an empty database.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelSeed>,
}

impl ModelCatalog {
    /// Parses and validates a JSON array of model seeds.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let models: Vec<ModelSeed> = serde_json::from_str(json)?;
        let catalog = Self { models };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Loads the catalog from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    /// Loads `path` if it exists, otherwise returns [`ModelCatalog::builtin`].
    pub fn load_or_builtin(path: &Path) -> Result<Self, ConfigError> {
        match path.exists() {
            true => Self::load_from_file(path),
            false => Ok(Self::builtin()),
        }
    }

    /// Default set of models, one or more per provider.
    pub fn builtin() -> Self {
        let models = vec![
            ModelSeed::builtin("GPT-4", Provider::OpenAI, "gpt-4", "OPENAI_API_KEY", "Most capable GPT-4 model"),
            ModelSeed::builtin("o3 mini", Provider::OpenAI, "o3-mini", "OPENAI_API_KEY", "Small reasoning model"),
            ModelSeed::builtin("Claude 3 Sonnet", Provider::Anthropic, "claude-3-sonnet", "ANTHROPIC_API_KEY", "Balanced performance"),
            ModelSeed::builtin("Gemini Pro", Provider::Google, "gemini-pro", "GOOGLE_AI_API_KEY", "Google's most capable text generation model"),
            ModelSeed::builtin("Llama 2 7B", Provider::HuggingFace, "llama2", "HF_API_KEY", "Meta's Llama 2 7B model"),
            ModelSeed::builtin("Mistral 7B", Provider::HuggingFace, "mistral", "HF_API_KEY", "Mistral AI's 7B model"),
            ModelSeed::builtin("Code Llama", Provider::HuggingFace, "codellama", "HF_API_KEY", "Meta's Code Llama model"),
            ModelSeed::builtin("Phi-2", Provider::HuggingFace, "phi-2", "HF_API_KEY", "Microsoft's Phi-2 model"),
        ];
        Self { models }
    }

    pub fn models(&self) -> &[ModelSeed] {
        &self.models
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for seed in &self.models {
            let required = [
                ("name", &seed.name),
                ("model_id", &seed.model_id),
                ("api_key_env_var", &seed.api_key_env_var),
            ];
            if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
                return Err(ConfigError::Validation(format!("{field} must not be empty")));
            }
            if seed.max_tokens == Some(0) {
                return Err(ConfigError::Validation(format!("max_tokens for '{}' must be positive", seed.model_id)));
            }
            if let Some(t) = seed.temperature.filter(|t| !(0.0..=2.0).contains(t)) {
                return Err(ConfigError::Validation(format!(
                    "temperature {t} for '{}' is outside 0.0..=2.0",
                    seed.model_id
                )));
            }
            if !seen.insert(seed.model_id.as_str()) {
                return Err(ConfigError::Validation(format!("duplicate model_id '{}'", seed.model_id)));
            }
        }
        Ok(())
    }
}
