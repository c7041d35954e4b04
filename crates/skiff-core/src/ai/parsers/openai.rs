//! OpenAI-compatible SSE parser for chat/completions format
//!
//! Stateless: tool call fragments are keyed by their `index` and merged by the
//! assembler, so nothing needs to be remembered between chunks here.

use serde_json::Value;

use crate::ai::streaming::StreamPart;
use crate::ai::types::{FinishReason, Usage};

/// Parse one `data:` payload from a chat/completions stream
pub fn parse_chunk(json: &Value) -> Vec<StreamPart> {
    // OpenAI format: {"error": {"message": "...", "type": "...", "code": "..."}}
    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .unwrap_or("Unknown error");
        let error_type = error
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("unknown");
        return vec![StreamPart::Error {
            error: format!("API error ({}): {}", error_type, message),
        }];
    }

    let mut parts = Vec::new();

    // {"choices": [{"index": 0, "delta": {...}, "finish_reason": null}]}
    if let Some(choice) = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    {
        if let Some(delta) = choice.get("delta").or_else(|| choice.get("message")) {
            if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
                if !content.is_empty() {
                    parts.push(StreamPart::text(content));
                }
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                for (position, tool_call) in tool_calls.iter().enumerate() {
                    parts.push(parse_tool_call_delta(tool_call, position));
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
            parts.push(StreamPart::finish(FinishReason::from_wire(reason)));
        }
    }

    if let Some(usage) = json.get("usage").and_then(parse_usage) {
        parts.push(StreamPart::Usage { usage });
    }

    parts
}

fn parse_tool_call_delta(tool_call: &Value, position: usize) -> StreamPart {
    let index = tool_call
        .get("index")
        .and_then(|i| i.as_u64())
        .map(|i| i as usize)
        .unwrap_or(position);

    let id = tool_call
        .get("id")
        .and_then(|i| i.as_str())
        .filter(|i| !i.is_empty())
        .map(str::to_string);

    let function = tool_call.get("function");
    let name = function
        .and_then(|f| f.get("name"))
        .and_then(|n| n.as_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let arguments = function.and_then(|f| f.get("arguments")).and_then(|a| match a {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        // Some providers send already-parsed arguments
        other => Some(other.to_string()),
    });

    StreamPart::ToolCallDelta {
        index,
        id,
        name,
        arguments,
    }
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    let prompt_tokens = usage
        .get("prompt_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;
    let completion_tokens = usage
        .get("completion_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;
    if prompt_tokens == 0 && completion_tokens == 0 {
        return None;
    }
    let total_tokens = usage
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .map(|t| t as usize)
        .unwrap_or(prompt_tokens + completion_tokens);

    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}
