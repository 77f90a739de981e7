use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OpenlikeError, Result};

/// Construction options for an OpenAI-compatible chat client.
///
/// Every field is optional; unset values fall back to the provider's
/// environment variables and defaults when the client is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    /// `None` lets the thinking policy decide.
    #[serde(default)]
    pub streaming: Option<bool>,
    #[serde(default)]
    pub enable_thinking: Option<bool>,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub default_headers: HashMap<String, String>,
    #[serde(default)]
    pub default_query: HashMap<String, String>,
    /// Merged verbatim into the top level of every request body.
    #[serde(default)]
    pub extra_body: Option<Map<String, Value>>,
    /// Additional request parameters without a dedicated field.
    #[serde(default)]
    pub model_kwargs: Map<String, Value>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            streaming: None,
            enable_thinking: None,
            thinking_budget: None,
            temperature: None,
            max_tokens: None,
            request_timeout_secs: None,
            max_retries: default_max_retries(),
            default_headers: HashMap::new(),
            default_query: HashMap::new(),
            extra_body: None,
            model_kwargs: Map::new(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

impl ClientOptions {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = Some(streaming);
        self
    }

    /// Request body extras derived from the thinking flags and `extra_body`.
    pub fn effective_extra_body(&self) -> Option<Map<String, Value>> {
        let mut body = self.extra_body.clone();
        if let Some(enabled) = self.enable_thinking {
            body.get_or_insert_with(Map::new)
                .insert("enable_thinking".to_string(), Value::Bool(enabled));
        }
        if let Some(budget) = self.thinking_budget {
            body.get_or_insert_with(Map::new)
                .insert("thinking_budget".to_string(), Value::from(budget));
        }
        body
    }
}

/// Top-level configuration file (`openlike.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    /// Provider tag; inferred from the model name when absent.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(flatten)]
    pub options: ClientOptions,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| OpenlikeError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| OpenlikeError::Config(e.to_string()))
    }
}

/// Resolve a setting: explicit value, then environment value, then static default.
/// Empty strings count as unset.
pub fn resolve_setting(
    explicit: Option<&str>,
    env_value: Option<String>,
    default: Option<&str>,
) -> Option<String> {
    explicit
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| env_value.filter(|v| !v.is_empty()))
        .or_else(|| default.filter(|v| !v.is_empty()).map(str::to_string))
}

/// Read an environment variable, treating unset and non-unicode alike.
pub fn env_setting(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
