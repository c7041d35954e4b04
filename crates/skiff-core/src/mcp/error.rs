//! MCP error types

use std::time::Duration;

/// Errors raised by a transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Command not found: {0}. Is it installed and in PATH?")]
    CommandNotFound(String),

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    #[error("SSE stream ended before announcing a message endpoint")]
    MissingEndpoint,

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    #[error("Transport closed")]
    Closed,
}

/// Errors raised by the protocol client and manager
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Server '{server}' is not ready ({state})")]
    NotReady { server: String, state: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unknown server: {0}")]
    UnknownServer(String),
}
