//! AI Client configuration
//!
//! Provider-agnostic configuration for OpenAI-compatible chat/completions APIs.

use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_MAX_TOKENS: usize = 8192;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the AI client
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    /// Base URL; `/chat/completions` is appended
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model ID used when a request does not name one
    pub model: String,
    /// Maximum output tokens
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub connect_timeout: Duration,
    /// Custom headers to send with requests
    pub custom_headers: HashMap<String, String>,
}

impl Default for ModelClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            custom_headers: HashMap::new(),
        }
    }
}

impl ModelClientConfig {
    /// Build from `SKIFF_API_KEY`, `SKIFF_BASE_URL` and `SKIFF_MODEL`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("SKIFF_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("SKIFF_BASE_URL") {
            if !url.is_empty() {
                config.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("SKIFF_MODEL") {
            if !model.is_empty() {
                config.model = model;
            }
        }
        config
    }

    /// Get the chat/completions endpoint
    pub fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
