//! Simple (non-streaming) API calls

use serde_json::Value;
use tracing::debug;

use super::{ensure_success, ModelError, ModelRequest, ModelResponse, OpenAiClient};
use crate::ai::assembler::assemble;
use crate::ai::parsers::openai::parse_chunk;
use crate::ai::streaming::StreamPart;

impl OpenAiClient {
    /// Make a single non-streaming chat/completions call
    pub(super) async fn call_simple(
        &self,
        request: ModelRequest,
    ) -> Result<ModelResponse, ModelError> {
        let body = self.build_body(&request, false);
        let response = self.build_request().json(&body).send().await?;
        let response = ensure_success(response).await?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;
        debug!("Non-streaming response received");

        response_from_json(&json)
    }
}

/// Build a response from a full chat/completions body. The chunk parser
/// understands `choices[0].message` as well as `delta`.
pub(super) fn response_from_json(json: &Value) -> Result<ModelResponse, ModelError> {
    let parts = parse_chunk(json);
    if let Some(StreamPart::Error { error }) = parts
        .iter()
        .find(|p| matches!(p, StreamPart::Error { .. }))
    {
        return Err(ModelError::Decode(error.clone()));
    }

    let (assembler, _) = assemble(parts);
    Ok(ModelResponse {
        text: assembler.text().to_string(),
        tool_calls: assembler.tool_calls().to_vec(),
        finish_reason: assembler.finish_reason().cloned(),
        usage: assembler.usage().cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::FinishReason;
    use serde_json::json;

    #[test]
    fn test_response_from_message_body() {
        let body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "bash", "arguments": "{\"command\":\"pwd\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let response = response_from_json(&body).unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_9");
        assert_eq!(response.tool_calls[0].arguments, json!({"command": "pwd"}));
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(15));
    }

    #[test]
    fn test_error_body_is_decode_error() {
        let body = json!({"error": {"message": "quota", "type": "billing"}});
        assert!(matches!(
            response_from_json(&body),
            Err(ModelError::Decode(_))
        ));
    }
}
