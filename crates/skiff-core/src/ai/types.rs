//! AI SDK types for provider communication
//!
//! These are NOT domain types - they're specific to the model API

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// AI SDK Tool definition (for provider communication only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool call requested by the model, assembled from streamed fragments.
///
/// `raw_arguments` is the exact concatenation of the argument fragments.
/// `arguments` is only meaningful when `argument_error` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub raw_arguments: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_error: Option<String>,
}

impl ToolCallRequest {
    /// Build a request with already-structured arguments
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: arguments.to_string(),
            arguments,
            argument_error: None,
        }
    }

    /// Parse a completed raw argument payload. An empty payload means `{}`.
    pub fn from_raw(id: String, name: String, raw_arguments: String) -> Self {
        let trimmed = raw_arguments.trim();
        let (arguments, argument_error) = if trimmed.is_empty() {
            (Value::Object(Default::default()), None)
        } else {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => (value, None),
                Err(e) => (Value::Null, Some(format!("Invalid JSON arguments: {}", e))),
            }
        };

        Self {
            id,
            name,
            raw_arguments,
            arguments,
            argument_error,
        }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Content types that can be in a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Unified message format for provider communication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Vec<Content>,
}

impl ModelMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::Text { text: text.into() }],
        }
    }

    /// Concatenated text blocks of this message
    pub fn text(&self) -> String {
        let mut combined = String::new();
        for block in &self.content {
            if let Content::Text { text } = block {
                combined.push_str(text);
            }
        }
        combined
    }
}

/// Finish reasons for model generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" => FinishReason::Stop,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Token usage reported by the model API
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_raw_parses_complete_payload() {
        let call = ToolCallRequest::from_raw(
            "call_1".into(),
            "bash".into(),
            r#"{"command":"ls"}"#.into(),
        );
        assert_eq!(call.arguments, json!({"command": "ls"}));
        assert!(call.argument_error.is_none());
    }

    #[test]
    fn test_from_raw_empty_payload_is_empty_object() {
        let call = ToolCallRequest::from_raw("c".into(), "t".into(), "  ".into());
        assert_eq!(call.arguments, json!({}));
        assert!(call.argument_error.is_none());
    }

    #[test]
    fn test_from_raw_truncated_payload_reports_error() {
        let call = ToolCallRequest::from_raw("c".into(), "t".into(), r#"{"command": "l"#.into());
        assert!(call.argument_error.is_some());
        assert_eq!(call.raw_arguments, r#"{"command": "l"#);
    }

    #[test]
    fn test_finish_reason_from_wire() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_wire("max_tokens"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_wire("weird"),
            FinishReason::Other("weird".into())
        );
    }
}
