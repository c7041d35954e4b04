//! Tool dispatch for the agentic loop.
//!
//! Handles:
//! - Resolution: built-in registry first, then the MCP catalog
//! - Confirmation for mutating tools via the `ConfirmationGate`
//! - Timeouts, panics and cancellation, all turned into failed `ToolResult`s
//! - Output truncation

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ai::types::{AiTool, ToolCallRequest};
use crate::mcp::McpManager;
use crate::tools::registry::{Tool, ToolCategory, ToolContext, ToolRegistry, ToolResult};
use crate::tools::truncation::truncate_output;

use super::confirmation::{ConfirmationGate, Decision};

/// Upper bound on a single tool execution
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Result text for anything the user cancelled or declined without feedback
pub const CANCELLED_MESSAGE: &str = "Operation cancelled by user";

/// Headroom over a tool's own `timeout` argument
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    mcp: Option<Arc<McpManager>>,
    gate: ConfirmationGate,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, gate: ConfirmationGate) -> Self {
        Self {
            registry,
            mcp: None,
            gate,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_mcp(mut self, mcp: Arc<McpManager>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn mcp(&self) -> Option<&Arc<McpManager>> {
        self.mcp.as_ref()
    }

    /// Merged catalog sent to the model: built-ins, then MCP tools
    pub async fn tools(&self) -> Vec<AiTool> {
        let mut tools = self.registry.get_ai_tools().await;
        if let Some(mcp) = &self.mcp {
            tools.extend(mcp.ai_tools().await);
        }
        tools
    }

    async fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if let Some(tool) = self.registry.get(name).await {
            return Some(tool);
        }
        let mcp = self.mcp.as_ref()?;
        let tool: Arc<dyn Tool> = Arc::new(mcp.resolve(name).await?);
        Some(tool)
    }

    /// Execute one tool call. Never fails: every problem becomes a failed result.
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let start = Instant::now();
        let result = self.execute_inner(call, ctx, cancel).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        if result.success {
            info!(tool = %call.name, id = %call.id, duration_ms, "Tool executed");
        } else {
            warn!(
                tool = %call.name,
                id = %call.id,
                duration_ms,
                "Tool failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        result
    }

    async fn execute_inner(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolResult {
        if let Some(error) = &call.argument_error {
            return ToolResult::invalid_parameters(error);
        }
        if cancel.is_cancelled() {
            return ToolResult::error(CANCELLED_MESSAGE);
        }

        let Some(tool) = self.resolve(&call.name).await else {
            return ToolResult::error(format!("Unknown tool: {}", call.name));
        };

        let category = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            tool.category(&call.arguments)
        })) {
            Ok(category) => category,
            Err(panic) => return panicked(&call.name, panic.as_ref()),
        };

        if let ToolCategory::Mutating(_) = category {
            let pending = match AssertUnwindSafe(tool.confirmation(&call.arguments, ctx))
                .catch_unwind()
                .await
            {
                Ok(pending) => pending,
                Err(panic) => return panicked(&call.name, panic.as_ref()),
            };
            let decision = tokio::select! {
                decision = self.gate.request(pending) => decision,
                _ = cancel.cancelled() => return ToolResult::error(CANCELLED_MESSAGE),
            };
            match decision {
                Decision::Approved | Decision::ApprovedRemember => {}
                Decision::Rejected(Some(feedback)) if !feedback.trim().is_empty() => {
                    info!(tool = %call.name, "Tool rejected with feedback");
                    return ToolResult::error(feedback);
                }
                Decision::Rejected(_) => return ToolResult::error(CANCELLED_MESSAGE),
            }
        }

        let timeout = self.timeout_for(call, ctx);
        let execution = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind();

        let mut result = tokio::select! {
            outcome = tokio::time::timeout(timeout, execution) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => panicked(&call.name, panic.as_ref()),
                Err(_) => ToolResult::error(format!(
                    "Tool '{}' timed out after {}s",
                    call.name,
                    timeout.as_secs()
                )),
            },
            _ = cancel.cancelled() => ToolResult::error(CANCELLED_MESSAGE),
        };

        if let Some(output) = result.output.as_mut() {
            *output = truncate_output(output);
        }
        result
    }

    fn timeout_for(&self, call: &ToolCallRequest, ctx: &ToolContext) -> Duration {
        let base = ctx.timeout.unwrap_or(self.timeout);
        // Tools that accept their own timeout (bash) may ask for longer
        match call.arguments.get("timeout").and_then(|t| t.as_u64()) {
            Some(ms) => base.max(Duration::from_millis(ms) + TIMEOUT_GRACE),
            None => base,
        }
    }
}

fn panicked(tool: &str, panic: &(dyn std::any::Any + Send)) -> ToolResult {
    let message = panic_message(panic);
    warn!(tool, "Tool panicked: {}", message);
    ToolResult::error(format!("Tool '{}' panicked: {}", tool, message))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::confirmation::{ConfirmationCategory, PendingConfirmation};
    use crate::mcp::transport::mock::{mock_pair, text_result};
    use crate::mcp::McpServerConfig;
    use crate::tools::register_builtin_tools;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            panic!("kaboom")
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ToolResult::success("done")
        }
    }

    /// Mutating tool whose confirmation description panics
    struct BadPromptTool;

    #[async_trait]
    impl Tool for BadPromptTool {
        fn name(&self) -> &str {
            "bad_prompt"
        }
        fn description(&self) -> &str {
            "Panics while describing itself"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn category(&self, _params: &Value) -> ToolCategory {
            ToolCategory::Mutating(ConfirmationCategory::ExternalTools)
        }
        async fn confirmation(&self, _params: &Value, _ctx: &ToolContext) -> PendingConfirmation {
            panic!("no preview")
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::success("ran")
        }
    }

    async fn dispatcher(gate: ConfirmationGate) -> (ToolDispatcher, tempfile::TempDir) {
        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&registry).await.unwrap();
        registry.register(Arc::new(PanickingTool)).await.unwrap();
        registry.register(Arc::new(SlowTool)).await.unwrap();
        registry.register(Arc::new(BadPromptTool)).await.unwrap();
        (ToolDispatcher::new(registry, gate), tempfile::tempdir().unwrap())
    }

    fn call(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new("call_1", name, args)
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (dispatcher, dir) = dispatcher(ConfirmationGate::auto_approve()).await;
        let result = dispatcher
            .execute(
                &call("teleport", json!({})),
                &ToolContext::new(dir.path()),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Unknown tool: teleport");
    }

    #[tokio::test]
    async fn test_argument_error_skips_execution() {
        let (dispatcher, dir) = dispatcher(ConfirmationGate::auto_approve()).await;
        let bad = ToolCallRequest::from_raw(
            "call_1".into(),
            "create_file".into(),
            r#"{"path": "a.txt", "content": "x"#.into(),
        );
        let result = dispatcher
            .execute(&bad, &ToolContext::new(dir.path()), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Invalid parameters"));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_panicking_tool_becomes_failed_result() {
        let (dispatcher, dir) = dispatcher(ConfirmationGate::auto_approve()).await;
        let result = dispatcher
            .execute(
                &call("explode", json!({})),
                &ToolContext::new(dir.path()),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_panicking_confirmation_becomes_failed_result() {
        let (gate, mut prompts) = ConfirmationGate::new();
        let (dispatcher, dir) = dispatcher(gate).await;
        let result = dispatcher
            .execute(
                &call("bad_prompt", json!({})),
                &ToolContext::new(dir.path()),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no preview"));
        assert!(prompts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hidden_commands_ask_before_running() {
        for command in ["echo $(touch created)", "env touch created", "ls `touch created`"] {
            let (gate, mut prompts) = ConfirmationGate::new();
            let (dispatcher, dir) = dispatcher(gate).await;
            let cancel = CancellationToken::new();

            let handle = {
                let cancel = cancel.clone();
                let ctx = ToolContext::new(dir.path());
                tokio::spawn(async move {
                    dispatcher
                        .execute(&call("bash", json!({"command": command})), &ctx, &cancel)
                        .await
                })
            };

            let prompt = prompts.recv().await.unwrap();
            assert_eq!(prompt.pending.category, ConfirmationCategory::BashCommands);
            assert!(!dir.path().join("created").exists(), "{}", command);
            prompt.respond(Decision::Rejected(None));

            let result = handle.await.unwrap();
            assert_eq!(result.error.as_deref(), Some(CANCELLED_MESSAGE));
            assert!(!dir.path().join("created").exists(), "{}", command);
        }
    }

    #[tokio::test]
    async fn test_timeout_and_cancellation() {
        let (dispatcher, dir) = dispatcher(ConfirmationGate::auto_approve()).await;
        let dispatcher = dispatcher.with_timeout(Duration::from_millis(50));
        let ctx = ToolContext::new(dir.path());

        let result = dispatcher
            .execute(&call("slow", json!({})), &ctx, &CancellationToken::new())
            .await;
        assert!(result.error.unwrap().contains("timed out"));

        let dispatcher = dispatcher.with_timeout(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let result = dispatcher.execute(&call("slow", json!({})), &ctx, &cancel).await;
        assert_eq!(result.error.unwrap(), CANCELLED_MESSAGE);
    }

    #[tokio::test]
    async fn test_rejection_feedback_is_verbatim() {
        let (gate, mut prompts) = ConfirmationGate::new();
        let (dispatcher, dir) = dispatcher(gate).await;

        tokio::spawn(async move {
            let prompt = prompts.recv().await.unwrap();
            assert_eq!(prompt.pending.category, ConfirmationCategory::FileOperations);
            assert_eq!(prompt.pending.target, "notes.txt");
            prompt.respond(Decision::Rejected(Some("not now".to_string())));

            let prompt = prompts.recv().await.unwrap();
            prompt.respond(Decision::Rejected(None));
        });

        let ctx = ToolContext::new(dir.path());
        let args = json!({"path": "notes.txt", "content": "hello"});
        let first = dispatcher
            .execute(&call("create_file", args.clone()), &ctx, &CancellationToken::new())
            .await;
        assert_eq!(first.error.as_deref(), Some("not now"));
        assert_eq!(first.model_content(), "not now");

        let second = dispatcher
            .execute(&call("create_file", args), &ctx, &CancellationToken::new())
            .await;
        assert_eq!(second.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(!dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_session_flag_skips_prompt() {
        let (gate, mut prompts) = ConfirmationGate::new();
        gate.set_flag(ConfirmationCategory::FileOperations, true);
        let (dispatcher, dir) = dispatcher(gate).await;

        let result = dispatcher
            .execute(
                &call("create_file", json!({"path": "a.txt", "content": "x"})),
                &ToolContext::new(dir.path()),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success);
        assert!(prompts.try_recv().is_err());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_read_only_command_needs_no_confirmation() {
        let (gate, mut prompts) = ConfirmationGate::new();
        let (dispatcher, dir) = dispatcher(gate).await;
        std::fs::write(dir.path().join("present.txt"), "").unwrap();

        let result = dispatcher
            .execute(
                &call("bash", json!({"command": "ls"})),
                &ToolContext::new(dir.path()),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success);
        assert!(result.output.unwrap().contains("present.txt"));
        assert!(prompts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mcp_tools_resolve_after_builtins() {
        let (dispatcher, dir) = dispatcher(ConfirmationGate::auto_approve()).await;
        let mcp = Arc::new(McpManager::new(dir.path().to_path_buf()));
        let (transport, server) = mock_pair();
        server.spawn_with(
            json!([{"name": "lookup", "inputSchema": {"type": "object"}}]),
            |_, args| Ok(text_result(&format!("found {}", args["q"]))),
        );
        mcp.add_server_with_transport(
            McpServerConfig::stdio("docs", "unused", vec![]),
            Arc::new(transport),
        )
        .await
        .unwrap();
        let dispatcher = dispatcher.with_mcp(mcp);

        let names: Vec<_> = dispatcher.tools().await.into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"bash".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("docs__lookup"));

        let result = dispatcher
            .execute(
                &call("docs__lookup", json!({"q": "tokio"})),
                &ToolContext::new(dir.path()),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.output.as_deref(), Some(r#"found "tokio""#));
    }

    #[tokio::test]
    async fn test_pending_confirmation_shape_from_tool() {
        let (gate, mut prompts) = ConfirmationGate::new();
        let (dispatcher, dir) = dispatcher(gate).await;
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            let ctx = ToolContext::new(dir.path());
            tokio::spawn(async move {
                dispatcher
                    .execute(&call("bash", json!({"command": "touch x"})), &ctx, &cancel)
                    .await
            })
        };

        let prompt = prompts.recv().await.unwrap();
        let expected = PendingConfirmation {
            operation: prompt.pending.operation.clone(),
            target: "touch x".to_string(),
            preview: prompt.pending.preview.clone(),
            category: ConfirmationCategory::BashCommands,
        };
        assert_eq!(prompt.pending, expected);

        // Aborting while waiting on the human resolves as cancelled
        cancel.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result.error.as_deref(), Some(CANCELLED_MESSAGE));
        drop(prompt);
    }
}
