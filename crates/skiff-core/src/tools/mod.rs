//! Tools for skiff
//!
//! Provides the tool registry and the built-in tool implementations.

pub mod implementations;
pub mod registry;
pub mod shell;
pub mod truncation;

pub use implementations::register_builtin_tools;
pub use registry::{
    parse_params, RegistryError, SharedWorkingDir, Tool, ToolCategory, ToolContext, ToolRegistry,
    ToolResult,
};
