//! Tool implementations
//!
//! Core tools:
//! - bash: Execute shell commands
//! - view_file: Read files and list directories
//! - create_file: Create/overwrite files
//! - str_replace_editor: Exact string replacement in files

pub mod bash;
pub mod edit;
pub mod read;
pub mod write;

pub use bash::BashTool;
pub use edit::StrReplaceEditorTool;
pub use read::ViewFileTool;
pub use write::CreateFileTool;

use std::sync::Arc;

use crate::tools::registry::{RegistryError, ToolRegistry};

/// Register all built-in tools
pub async fn register_builtin_tools(registry: &ToolRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(BashTool)).await?;
    registry.register(Arc::new(ViewFileTool)).await?;
    registry.register(Arc::new(CreateFileTool)).await?;
    registry.register(Arc::new(StrReplaceEditorTool)).await?;
    Ok(())
}
