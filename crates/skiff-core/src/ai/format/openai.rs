//! OpenAI API format handler
//!
//! Handles conversion to the chat/completions request format.

use serde_json::{json, Value};

use crate::ai::types::{AiTool, Content, ModelMessage, Role};

/// Convert domain messages to OpenAI chat/completions format
///
/// Tool results can come in `Role::Tool` or `Role::User` messages; each one
/// becomes its own `{"role": "tool"}` message keyed by `tool_call_id`.
pub fn convert_messages(system_prompt: Option<&str>, messages: &[ModelMessage]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        result.push(json!({"role": "system", "content": system}));
    }

    for msg in messages {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let has_tool_results = msg
            .content
            .iter()
            .any(|c| matches!(c, Content::ToolResult { .. }));

        if has_tool_results {
            for content in &msg.content {
                if let Content::ToolResult {
                    tool_use_id,
                    output,
                    ..
                } = content
                {
                    let output_str = match output {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    result.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": output_str
                    }));
                }
            }
            continue;
        }

        let has_tool_use = msg
            .content
            .iter()
            .any(|c| matches!(c, Content::ToolUse { .. }));

        if has_tool_use && msg.role == Role::Assistant {
            let mut tool_calls = Vec::new();
            let mut text_content = String::new();

            for content in &msg.content {
                match content {
                    Content::Text { text } => text_content.push_str(text),
                    Content::ToolUse { id, name, input } => {
                        tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string()
                            }
                        }));
                    }
                    Content::ToolResult { .. } => {}
                }
            }

            let mut msg_obj = json!({
                "role": "assistant",
                "tool_calls": tool_calls
            });
            if !text_content.is_empty() {
                msg_obj["content"] = json!(text_content);
            }
            result.push(msg_obj);
            continue;
        }

        let text = msg.text();
        if !text.is_empty() {
            result.push(json!({
                "role": role,
                "content": text
            }));
        }
    }

    result
}

/// Convert tool definitions to OpenAI function tools
pub fn convert_tools(tools: &[AiTool]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema
                }
            })
        })
        .collect()
}
