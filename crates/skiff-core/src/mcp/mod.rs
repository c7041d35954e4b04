//! MCP (Model Context Protocol) client
//!
//! Connects to external tool servers over stdio, streamable HTTP or SSE
//! and exposes their tools to the agent.

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod tool;
pub mod transport;

pub use client::{ConnectionState, McpClient};
pub use config::{McpConfig, McpServerConfig, TransportConfig};
pub use error::{McpError, TransportError};
pub use manager::{namespaced_name, McpCatalogEntry, McpManager, McpServerInfo};
pub use protocol::{McpToolDef, McpToolResult};
pub use tool::McpTool;
pub use transport::{Transport, TransportEvent, TransportKind};
