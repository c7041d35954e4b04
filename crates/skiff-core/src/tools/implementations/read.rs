//! View tool - Read file contents or list a directory

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const DEFAULT_LINE_LIMIT: usize = 2000;

pub struct ViewFileTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

fn format_size(size: u64) -> String {
    match size {
        0..1024 => format!("{} bytes", size),
        1024..1_048_576 => format!("{:.1} KB", size as f64 / 1024.0),
        _ => format!("{:.1} MB", size as f64 / 1_048_576.0),
    }
}

async fn list_directory(path: &std::path::Path) -> ToolResult {
    let mut entries = match fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) => return ToolResult::error(format!("Failed to read directory: {}", e)),
    };

    let mut names = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    name.push('/');
                }
                names.push(name);
            }
            Ok(None) => break,
            Err(e) => return ToolResult::error(format!("Failed to read directory: {}", e)),
        }
    }
    names.sort();

    let count = names.len();
    ToolResult::success_with_data(
        names.join("\n"),
        json!({"path": path.display().to_string(), "entries": count}),
    )
}

#[async_trait]
impl Tool for ViewFileTool {
    fn name(&self) -> &str {
        "view_file"
    }

    fn description(&self) -> &str {
        "View a file's contents, optionally a 1-indexed line range. \
         When the path is a directory, lists its entries."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file or directory, relative to the working directory"
                },
                "start_line": {
                    "type": "number",
                    "description": "First line to show (1-indexed)"
                },
                "end_line": {
                    "type": "number",
                    "description": "Last line to show (inclusive)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = ctx.resolve_path(&params.path);
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => return ToolResult::error(format!("File not found: {}", params.path)),
        };

        if metadata.is_dir() {
            return list_directory(&path).await;
        }

        let content = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let check_len = content.len().min(8192);
        if content[..check_len].contains(&0) {
            return ToolResult::success(format!(
                "Binary file: {} ({})",
                path.display(),
                format_size(metadata.len())
            ));
        }

        let content = match String::from_utf8(content) {
            Ok(s) => s,
            Err(e) => return ToolResult::error(format!("File is not valid UTF-8: {}", e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();

        let start = params.start_line.unwrap_or(1).max(1) - 1;
        let end = params
            .end_line
            .unwrap_or(start + DEFAULT_LINE_LIMIT)
            .min(total_lines);

        if total_lines == 0 {
            return ToolResult::success_with_data(
                String::new(),
                json!({"total_lines": 0, "lines_returned": 0}),
            );
        }
        if start >= total_lines {
            return ToolResult::error(format!(
                "Start line {} is beyond file length ({})",
                start + 1,
                total_lines
            ));
        }
        if end <= start {
            return ToolResult::invalid_parameters("end_line must not be before start_line");
        }

        ToolResult::success_with_data(
            lines[start..end].join("\n"),
            json!({
                "total_lines": total_lines,
                "lines_returned": end - start,
                "start_line": start + 1
            }),
        )
    }
}
