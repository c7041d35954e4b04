//! Create tool - Create or overwrite files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tracing::info;

use crate::agent::confirmation::{ConfirmationCategory, PendingConfirmation};
use crate::tools::registry::{Tool, ToolCategory};
use crate::tools::{parse_params, ToolContext, ToolResult};

pub struct CreateFileTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Creates parent directories if needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn category(&self, _params: &Value) -> ToolCategory {
        ToolCategory::Mutating(ConfirmationCategory::FileOperations)
    }

    async fn confirmation(&self, params: &Value, ctx: &ToolContext) -> PendingConfirmation {
        let path = params.get("path").and_then(|p| p.as_str()).unwrap_or_default();
        let exists = !path.is_empty() && ctx.resolve_path(path).exists();
        PendingConfirmation {
            operation: if exists { "Overwrite file" } else { "Create file" }.to_string(),
            target: path.to_string(),
            preview: params
                .get("content")
                .and_then(|c| c.as_str())
                .map(str::to_string),
            category: ConfirmationCategory::FileOperations,
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = ctx.resolve_path(&params.path);
        info!("Create tool: resolved path = {:?}", path);

        if path.is_dir() {
            return ToolResult::error(format!("Path is a directory: {}", params.path));
        }

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            info!("Create tool: creating parent directory {:?}", parent);
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create directory: {}", e));
            }
        }

        match fs::write(&path, &params.content).await {
            Ok(_) => ToolResult::success_with_data(
                format!(
                    "Successfully wrote {} lines to {}",
                    params.content.lines().count(),
                    path.display()
                ),
                json!({
                    "bytes_written": params.content.len(),
                    "file_path": path.display().to_string()
                }),
            ),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}
