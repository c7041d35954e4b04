//! MCP configuration parsing
//!
//! Parses .mcp.json files. A server entry with `command` is a local process
//! spoken to over stdio. A server entry with `url` is remote: streamable HTTP
//! by default, or the legacy SSE transport when `"type": "sse"`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Default per-request timeout for MCP calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the per-project config file
pub const CONFIG_FILE_NAME: &str = ".mcp.json";

/// Raw .mcp.json contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpConfigFile {
    #[serde(default)]
    mcp_servers: BTreeMap<String, RawServerConfig>,
}

/// Raw server configuration from JSON
#[derive(Debug, Clone, Deserialize)]
struct RawServerConfig {
    #[serde(rename = "type", default)]
    server_type: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, alias = "requireConfirmation")]
    require_confirmation: bool,
    #[serde(default, alias = "timeoutSecs")]
    timeout_secs: Option<u64>,
    #[serde(default)]
    disabled: bool,
}

/// How to reach a server
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Spawn a local process and speak over its stdin/stdout
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// One HTTP POST per message
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
    /// Long-lived event stream for inbound, POST for outbound
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Http { .. } => "http",
            TransportConfig::Sse { .. } => "sse",
        }
    }
}

/// Resolved server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: TransportConfig,
    /// Route calls to this server's tools through the confirmation gate
    pub require_confirmation: bool,
    pub request_timeout: Duration,
}

impl McpServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        )
    }

    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            require_confirmation: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_confirmation(mut self, require: bool) -> Self {
        self.require_confirmation = require;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Resolved MCP configuration
#[derive(Debug, Clone, Default)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
}

impl McpConfig {
    /// Load config from .mcp.json in project root
    pub async fn load(working_dir: &Path) -> Result<Self> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            tracing::debug!("No .mcp.json found at {:?}", config_path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {:?}", config_path))?;

        let config =
            Self::parse(&content).with_context(|| format!("Failed to parse {:?}", config_path))?;

        tracing::info!(
            "Loaded MCP config with {} servers from {:?}",
            config.servers.len(),
            config_path
        );

        Ok(config)
    }

    /// Parse .mcp.json contents
    pub fn parse(content: &str) -> Result<Self> {
        let file: McpConfigFile = serde_json::from_str(content)?;
        let mut servers = Vec::with_capacity(file.mcp_servers.len());

        for (name, raw) in file.mcp_servers {
            if raw.disabled {
                tracing::debug!("Skipping disabled MCP server '{}'", name);
                continue;
            }
            servers.push(resolve_server(name, raw)?);
        }

        Ok(Self { servers })
    }
}

fn resolve_server(name: String, raw: RawServerConfig) -> Result<McpServerConfig> {
    let transport = match (raw.command, raw.url) {
        (Some(command), None) => TransportConfig::Stdio {
            command,
            args: raw.args.iter().map(|a| expand_env_var(a)).collect(),
            env: expand_map(&raw.env),
        },
        (None, Some(url)) => {
            let url = expand_env_var(&url);
            let headers = expand_map(&raw.headers);
            match raw.server_type.as_deref() {
                Some("sse") => TransportConfig::Sse { url, headers },
                None | Some("http") | Some("streamable-http") | Some("url") => {
                    TransportConfig::Http { url, headers }
                }
                Some(other) => bail!("Server '{}' has unknown type '{}'", name, other),
            }
        }
        (Some(_), Some(_)) => bail!("Server '{}' sets both command and url", name),
        (None, None) => bail!("Server '{}' needs either command or url", name),
    };

    Ok(McpServerConfig {
        name,
        transport,
        require_confirmation: raw.require_confirmation,
        request_timeout: raw
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
    })
}

fn expand_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_var(v)))
        .collect()
}

/// Expand ${VAR} references from the process environment
fn expand_env_var(s: &str) -> String {
    let mut result = s.to_string();
    let mut search_from = 0;

    while let Some(rel_start) = result[search_from..].find("${") {
        let start = search_from + rel_start;
        let Some(end_offset) = result[start..].find('}') else {
            break;
        };
        let end = start + end_offset;
        let var_name = &result[start + 2..end];

        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Environment variable {} is not set", var_name);
                String::new()
            }
        };

        result.replace_range(start..end + 1, &value);
        search_from = start + value.len();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stdio_server() {
        let json = r#"{
            "mcpServers": {
                "files": {
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem", "."],
                    "env": {"LOG_LEVEL": "debug"}
                }
            }
        }"#;

        let config = McpConfig::parse(json).unwrap();
        assert_eq!(config.servers.len(), 1);
        let server = &config.servers[0];
        assert_eq!(server.name, "files");
        assert!(!server.require_confirmation);
        assert_eq!(server.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        match &server.transport {
            TransportConfig::Stdio { command, args, env } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 3);
                assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
            }
            other => panic!("expected stdio, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_remote_servers() {
        let json = r#"{
            "mcpServers": {
                "search": {
                    "url": "https://mcp.example.com/mcp",
                    "headers": {"Authorization": "Bearer abc"},
                    "require_confirmation": true,
                    "timeout_secs": 5
                },
                "legacy": {"type": "sse", "url": "https://mcp.example.com/sse"},
                "off": {"command": "nope", "disabled": true}
            }
        }"#;

        let config = McpConfig::parse(json).unwrap();
        assert_eq!(config.servers.len(), 2);

        // BTreeMap keeps names ordered
        assert_eq!(config.servers[0].name, "legacy");
        assert_eq!(config.servers[0].transport.kind(), "sse");

        let search = &config.servers[1];
        assert_eq!(search.transport.kind(), "http");
        assert!(search.require_confirmation);
        assert_eq!(search.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_server_entries() {
        assert!(McpConfig::parse(r#"{"mcpServers": {"x": {}}}"#).is_err());
        assert!(McpConfig::parse(r#"{"mcpServers": {"x": {"command": "a", "url": "b"}}}"#).is_err());
        assert!(
            McpConfig::parse(r#"{"mcpServers": {"x": {"type": "carrier-pigeon", "url": "b"}}}"#)
                .is_err()
        );
        assert!(McpConfig::parse("{}").unwrap().servers.is_empty());
    }

    #[test]
    fn test_expand_env_var() {
        assert_eq!(
            expand_env_var("https://api.example.com"),
            "https://api.example.com"
        );
        std::env::set_var("SKIFF_TEST_MCP_TOKEN", "s3cret");
        assert_eq!(
            expand_env_var("Bearer ${SKIFF_TEST_MCP_TOKEN}"),
            "Bearer s3cret"
        );
        assert_eq!(expand_env_var("${SKIFF_TEST_MCP_UNSET_VAR}x"), "x");
        assert_eq!(expand_env_var("${unterminated"), "${unterminated");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = McpConfig::load(dir.path()).await.unwrap();
        assert!(config.servers.is_empty());
    }
}
