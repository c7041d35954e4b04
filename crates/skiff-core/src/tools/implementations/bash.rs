//! Bash tool - Execute shell commands in the session working directory

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::agent::confirmation::{ConfirmationCategory, PendingConfirmation};
use crate::tools::registry::{Tool, ToolCategory};
use crate::tools::shell::{classify_command, dangerous_command_reason, tokenize_shell};
use crate::tools::truncation::truncate_tail_lines;
use crate::tools::{parse_params, ToolContext, ToolResult};

const MAX_OUTPUT_LINES: usize = 2000;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07]*\x07").expect("valid regex")
});

pub struct BashTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

/// Strip ANSI escape sequences from text
fn strip_ansi(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

/// Target of a bare `cd` command, if the command is exactly that
fn cd_target(command: &str) -> Option<Option<String>> {
    let tokens = tokenize_shell(command.trim());
    match tokens.as_slice() {
        [cd] if cd == "cd" => Some(None),
        [cd, dir] if cd == "cd" => Some(Some(dir.clone())),
        _ => None,
    }
}

fn change_directory(target: Option<String>, ctx: &ToolContext) -> ToolResult {
    let destination = match target.as_deref() {
        None | Some("~") => match dirs::home_dir() {
            Some(home) => home,
            None => return ToolResult::error("Cannot determine home directory"),
        },
        Some(dir) => match dir.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => return ToolResult::error("Cannot determine home directory"),
            },
            None => ctx.resolve_path(dir),
        },
    };

    let canonical: PathBuf = match destination.canonicalize() {
        Ok(path) if path.is_dir() => path,
        Ok(path) => return ToolResult::error(format!("Not a directory: {}", path.display())),
        Err(e) => {
            return ToolResult::error(format!(
                "cd: {}: {}",
                destination.display(),
                e
            ))
        }
    };

    tracing::info!(dir = %canonical.display(), "Changed working directory");
    ctx.working_dir.set(canonical.clone());
    ToolResult::success_with_data(
        format!("Changed directory to {}", canonical.display()),
        json!({"working_dir": canonical.display().to_string()}),
    )
}

fn build_shell_command(command: &str, ctx: &ToolContext) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.env("NO_COLOR", "1");
    cmd.current_dir(ctx.cwd());
    cmd.kill_on_drop(true);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
}

async fn run_command(mut cmd: Command, timeout_duration: Duration) -> ToolResult {
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
    };

    // Dropping the child on timeout kills it
    let output = match timeout(timeout_duration, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return ToolResult::error(format!("Failed to wait for command: {}", e)),
        Err(_) => {
            return ToolResult::error(format!(
                "Command timed out after {} ms",
                timeout_duration.as_millis()
            ))
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    let processed = truncate_tail_lines(strip_ansi(&combined).trim_end(), MAX_OUTPUT_LINES);

    let exit_code = output.status.code().unwrap_or(-1);
    let data = json!({"exit_code": exit_code});
    if output.status.success() {
        ToolResult::success_with_data(processed, data)
    } else {
        ToolResult {
            data: Some(data),
            ..ToolResult::error_with_output(
                format!("Command exited with code {}", exit_code),
                processed,
            )
        }
    }
}

fn command_of(params: &Value) -> &str {
    params
        .get("command")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the current working directory. \
         `cd <dir>` changes the working directory for later commands. \
         Read-only commands (ls, cat, grep, ...) run without confirmation."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (max 600000)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn category(&self, params: &Value) -> ToolCategory {
        classify_command(command_of(params))
    }

    async fn confirmation(&self, params: &Value, ctx: &ToolContext) -> PendingConfirmation {
        let category = match self.category(params) {
            ToolCategory::Mutating(category) => category,
            ToolCategory::ReadOnly => ConfirmationCategory::BashCommands,
        };
        PendingConfirmation {
            operation: "Run command".to_string(),
            target: command_of(params).to_string(),
            preview: Some(format!("$ {}\n(in {})", command_of(params), ctx.cwd().display())),
            category,
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.command.trim().is_empty() {
            return ToolResult::invalid_parameters("command must not be empty");
        }

        if let Some(reason) = dangerous_command_reason(&params.command) {
            tracing::warn!(command = %params.command, reason, "Blocked dangerous command");
            return ToolResult::error(format!("Command blocked: {}", reason));
        }

        if let Some(target) = cd_target(&params.command) {
            return change_directory(target, ctx);
        }

        tracing::info!(command = %params.command, "Executing bash command");

        let timeout_ms = params
            .timeout
            .or_else(|| ctx.timeout.map(|t| t.as_millis() as u64))
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);

        let cmd = build_shell_command(&params.command, ctx);
        run_command(cmd, Duration::from_millis(timeout_ms)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }

    #[test]
    fn test_cd_target() {
        assert_eq!(cd_target("cd src"), Some(Some("src".into())));
        assert_eq!(cd_target("cd"), Some(None));
        assert_eq!(cd_target("cd src && ls"), None);
        assert_eq!(cd_target("ls"), None);
    }

    #[test]
    fn test_category_follows_command() {
        assert_eq!(BashTool.category(&json!({"command": "ls"})), ToolCategory::ReadOnly);
        assert_eq!(
            BashTool.category(&json!({"command": "touch x"})),
            ToolCategory::Mutating(ConfirmationCategory::BashCommands)
        );
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let ctx = ToolContext::new(dir.path());

        let result = BashTool.execute(json!({"command": "ls"}), &ctx).await;
        assert!(result.success);
        assert!(result.output.unwrap().contains("marker.txt"));
        assert_eq!(result.data.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_output() {
        let ctx = ToolContext::new(std::env::temp_dir());
        let result = BashTool
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ctx)
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Command exited with code 3"));
        assert_eq!(result.output.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn test_cd_changes_session_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let ctx = ToolContext::new(dir.path());

        let result = BashTool.execute(json!({"command": "cd sub"}), &ctx).await;
        assert!(result.success);
        assert_eq!(ctx.cwd(), dir.path().join("sub").canonicalize().unwrap());

        let missing = BashTool.execute(json!({"command": "cd nope"}), &ctx).await;
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn test_timeout() {
        let ctx = ToolContext::new(std::env::temp_dir());
        let result = BashTool
            .execute(json!({"command": "sleep 5", "timeout": 100}), &ctx)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_dangerous_command_blocked() {
        let ctx = ToolContext::new(std::env::temp_dir());
        let result = BashTool.execute(json!({"command": "rm -rf /"}), &ctx).await;
        assert_eq!(result.error.as_deref(), Some("Command blocked: destructive rm target"));
    }
}
