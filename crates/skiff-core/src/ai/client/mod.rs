//! Model API client
//!
//! `ModelClient` is the seam the orchestrator talks to. `OpenAiClient` is the
//! reqwest implementation for OpenAI-compatible chat/completions endpoints;
//! tests substitute scripted clients.

mod config;
mod simple;
mod streaming;

pub use config::{ModelClientConfig, DEFAULT_MODEL};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ai::streaming::StreamPart;
use crate::ai::types::{AiTool, FinishReason, ModelMessage, ToolCallRequest, Usage};

/// Errors from the model API
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// One request to the model
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<AiTool>,
}

/// A complete (non-streamed) model response
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl ModelResponse {
    /// Replay the response as stream fragments so it can go through the
    /// same assembler as a streamed one
    pub fn into_parts(self) -> Vec<StreamPart> {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(StreamPart::text(self.text));
        }
        for (index, call) in self.tool_calls.into_iter().enumerate() {
            parts.push(StreamPart::ToolCallDelta {
                index,
                id: Some(call.id),
                name: Some(call.name),
                arguments: Some(call.raw_arguments),
            });
        }
        if let Some(usage) = self.usage {
            parts.push(StreamPart::Usage { usage });
        }
        parts.push(StreamPart::finish(
            self.finish_reason.unwrap_or(FinishReason::Stop),
        ));
        parts
    }
}

/// Model API abstraction
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a streamed completion. The receiver yields fragments until the
    /// provider finishes; the channel closing is the end-of-stream signal.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, ModelError>;

    /// Single non-streamed completion
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// OpenAI-compatible chat/completions client
pub struct OpenAiClient {
    http: reqwest::Client,
    config: ModelClientConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelClientConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ModelClientConfig {
        &self.config
    }

    fn build_body(&self, request: &ModelRequest, stream: bool) -> serde_json::Value {
        use crate::ai::format::openai::{convert_messages, convert_tools};

        let model = if request.model.is_empty() {
            self.config.model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": convert_messages(request.system_prompt.as_deref(), &request.messages),
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }

        if let Some(temp) = self.config.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        // Sorted deterministically for stable prefix caching
        let mut sorted = request.tools.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        let tools = convert_tools(&sorted);
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }

    fn build_request(&self) -> reqwest::RequestBuilder {
        let mut request = self.http.post(self.config.api_url());
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in &self.config.custom_headers {
            request = request.header(name, value);
        }
        request
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, ModelError> {
        self.call_streaming(request).await
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.call_simple(request).await
    }
}

/// Turn a non-2xx response into `ModelError::Status`
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!("Model API error {}: {}", status, body);
    Err(ModelError::Status {
        status: status.as_u16(),
        body,
    })
}
