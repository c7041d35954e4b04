//! Tool registry for managing available tools
//!
//! The registry is closed: names are validated when a tool is registered and
//! lookups are by exact name only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::agent::confirmation::{ConfirmationCategory, PendingConfirmation};
use crate::ai::types::AiTool;

/// Separator between server name and tool name for remote tools
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Tool category for permission checking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Never modifies state; runs without confirmation
    ReadOnly,
    /// Needs confirmation unless the category's session flag is set
    Mutating(ConfirmationCategory),
}

/// Tool execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    /// Create a success result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            data: None,
        }
    }

    /// Success with structured data alongside the text output
    pub fn success_with_data(output: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::success(output)
        }
    }

    /// Create an error result
    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(msg.to_string()),
            data: None,
        }
    }

    /// Failure that still carries partial output (e.g. a failing command)
    pub fn error_with_output(msg: impl std::fmt::Display, output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::error(msg)
        }
    }

    /// Create an invalid-parameters error
    pub fn invalid_parameters(msg: impl std::fmt::Display) -> Self {
        Self::error(format!("Invalid parameters: {}", msg))
    }

    /// Text handed back to the model as the tool result content
    pub fn model_content(&self) -> String {
        if self.success {
            return self.output.clone().unwrap_or_default();
        }
        let error = self.error.as_deref().unwrap_or("Tool failed");
        match self.output.as_deref().filter(|o| !o.is_empty()) {
            Some(output) if output != error => format!("{}\n\n{}", error, output),
            _ => error.to_string(),
        }
    }
}

/// Parse tool parameters, returning a ToolResult error on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params).map_err(ToolResult::invalid_parameters)
}

/// Working directory shared by every tool in a session; `cd` moves it
#[derive(Debug, Clone)]
pub struct SharedWorkingDir(Arc<parking_lot::RwLock<PathBuf>>);

impl SharedWorkingDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(parking_lot::RwLock::new(path.into())))
    }

    pub fn get(&self) -> PathBuf {
        self.0.read().clone()
    }

    pub fn set(&self, path: impl Into<PathBuf>) {
        *self.0.write() = path.into();
    }
}

/// Context for tool execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_dir: SharedWorkingDir,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: SharedWorkingDir::new(working_dir),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Current working directory
    pub fn cwd(&self) -> PathBuf {
        self.working_dir.get()
    }

    /// Resolve a path relative to working directory (absolute paths pass through)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.cwd().join(p)
        }
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description for AI
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Whether this particular invocation needs confirmation
    fn category(&self, _params: &Value) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    /// Describe the invocation for the confirmation prompt
    async fn confirmation(&self, params: &Value, _ctx: &ToolContext) -> PendingConfirmation {
        let category = match self.category(params) {
            ToolCategory::Mutating(category) => category,
            ToolCategory::ReadOnly => ConfirmationCategory::ExternalTools,
        };
        PendingConfirmation {
            operation: format!("Run {}", self.name()),
            target: params.to_string(),
            preview: None,
            category,
        }
    }

    /// Execute the tool
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Rejected registrations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool name must not be empty")]
    EmptyName,
    #[error("Tool name '{0}' contains the reserved separator '__'")]
    ReservedSeparator(String),
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),
}

/// Registry of built-in tools
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if name.contains(NAMESPACE_SEPARATOR) {
            return Err(RegistryError::ReservedSeparator(name));
        }

        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!("Registered tool: {}", name);
        tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Get all tools as AI tool definitions, sorted by name
    pub async fn get_ai_tools(&self) -> Vec<AiTool> {
        let tools = self.tools.read().await;
        let mut defs: Vec<AiTool> = tools
            .values()
            .map(|t| AiTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }
}
