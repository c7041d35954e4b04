//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = ".skiff";

/// Get the skiff config directory (~/.skiff)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the logs directory (~/.skiff/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Project MCP server config (<dir>/.mcp.json)
pub fn mcp_config_path(working_dir: &Path) -> PathBuf {
    working_dir.join(crate::mcp::config::CONFIG_FILE_NAME)
}

/// Ensure the logs directory exists, creating it if necessary
pub fn ensure_logs_dir() -> std::io::Result<PathBuf> {
    let dir = logs_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
