//! MCP Tool wrapper
//!
//! Wraps a remote MCP tool as our Tool trait so the dispatcher treats it
//! like any built-in tool.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::client::McpClient;
use super::protocol::{format_mcp_result, McpToolDef};
use crate::agent::confirmation::{ConfirmationCategory, PendingConfirmation};
use crate::tools::registry::{Tool, ToolCategory, ToolContext, ToolResult};

/// Wraps an MCP tool as our Tool trait
pub struct McpTool {
    server_name: String,
    full_name: String,
    definition: McpToolDef,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(full_name: String, definition: McpToolDef, client: Arc<McpClient>) -> Self {
        Self {
            server_name: client.name().to_string(),
            full_name,
            definition,
            client,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Name the server knows the tool by
    pub fn remote_name(&self) -> &str {
        &self.definition.name
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        self.definition.description.as_deref().unwrap_or("MCP tool")
    }

    fn parameters_schema(&self) -> Value {
        self.definition.input_schema.clone()
    }

    fn category(&self, _params: &Value) -> ToolCategory {
        if self.client.config().require_confirmation {
            ToolCategory::Mutating(ConfirmationCategory::ExternalTools)
        } else {
            ToolCategory::ReadOnly
        }
    }

    async fn confirmation(&self, params: &Value, _ctx: &ToolContext) -> PendingConfirmation {
        PendingConfirmation {
            operation: format!("Call {} tool", self.server_name),
            target: self.definition.name.clone(),
            preview: serde_json::to_string_pretty(params).ok(),
            category: ConfirmationCategory::ExternalTools,
        }
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        match self.client.call_tool(&self.definition.name, params).await {
            Ok(result) if result.is_error => ToolResult::error(format_mcp_result(&result)),
            Ok(result) => ToolResult::success(format_mcp_result(&result)),
            Err(e) => ToolResult::error(format!("MCP error: {}", e)),
        }
    }
}
