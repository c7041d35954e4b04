//! Edit tool - Replace text in a file

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;

use similar::TextDiff;

use crate::agent::confirmation::{ConfirmationCategory, PendingConfirmation};
use crate::tools::registry::{Tool, ToolCategory};
use crate::tools::{parse_params, ToolContext, ToolResult};

pub struct StrReplaceEditorTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    old_str: String,
    new_str: String,
    #[serde(default)]
    replace_all: bool,
}

/// Apply the replacement, returning the new content and replacement count
fn apply_replacement(content: &str, params: &Params) -> Result<(String, usize), String> {
    if params.old_str.is_empty() {
        return Err("old_str must not be empty".to_string());
    }

    let count = content.matches(&params.old_str).count();
    if count == 0 {
        return Err(format!("String not found in file: {:?}", params.old_str));
    }

    if params.replace_all {
        return Ok((content.replace(&params.old_str, &params.new_str), count));
    }

    if count > 1 {
        return Err(format!(
            "String found {} times. Use replace_all=true to replace all occurrences, or provide more context to make it unique.",
            count
        ));
    }

    Ok((content.replacen(&params.old_str, &params.new_str, 1), 1))
}

fn generate_compact_diff(old: &str, new: &str, path: &Path) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        output.push_str(&format!("{}", hunk));
    }
    if output.is_empty() {
        return String::new();
    }
    format!("--- {}\n+++ {}\n{}", path.display(), path.display(), output)
}

#[async_trait]
impl Tool for StrReplaceEditorTool {
    fn name(&self) -> &str {
        "str_replace_editor"
    }

    fn description(&self) -> &str {
        "Replace text in a file. old_str must match exactly and be unique unless replace_all is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the working directory"
                },
                "old_str": {
                    "type": "string",
                    "description": "The exact text to replace"
                },
                "new_str": {
                    "type": "string",
                    "description": "The text to replace it with"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)",
                    "default": false
                }
            },
            "required": ["path", "old_str", "new_str"],
            "additionalProperties": false
        })
    }

    fn category(&self, _params: &Value) -> ToolCategory {
        ToolCategory::Mutating(ConfirmationCategory::FileOperations)
    }

    async fn confirmation(&self, params: &Value, ctx: &ToolContext) -> PendingConfirmation {
        let target = params
            .get("path")
            .and_then(|p| p.as_str())
            .unwrap_or_default()
            .to_string();

        // Preview is best effort; execute reports the real error
        let preview = match serde_json::from_value::<Params>(params.clone()) {
            Ok(parsed) => {
                let path = ctx.resolve_path(&parsed.path);
                match fs::read_to_string(&path).await {
                    Ok(content) => apply_replacement(&content, &parsed)
                        .ok()
                        .map(|(new_content, _)| generate_compact_diff(&content, &new_content, &path))
                        .filter(|d| !d.is_empty()),
                    Err(_) => None,
                }
            }
            Err(_) => None,
        };

        PendingConfirmation {
            operation: "Edit file".to_string(),
            target,
            preview,
            category: ConfirmationCategory::FileOperations,
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = ctx.resolve_path(&params.path);
        if !path.is_file() {
            return ToolResult::error(format!("File not found: {}", params.path));
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let (new_content, count) = match apply_replacement(&content, &params) {
            Ok(applied) => applied,
            Err(e) => return ToolResult::error(e),
        };
        let diff = generate_compact_diff(&content, &new_content, &path);

        match fs::write(&path, &new_content).await {
            Ok(_) => ToolResult::success_with_data(
                format!("Replaced {} occurrence(s) in {}\n{}", count, params.path, diff),
                json!({
                    "replacements": count,
                    "file_path": path.display().to_string(),
                    "diff": diff
                }),
            ),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}
