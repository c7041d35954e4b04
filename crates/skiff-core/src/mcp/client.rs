//! MCP Client
//!
//! Handles JSON-RPC communication with a single MCP server over any transport.
//! A background receive loop routes replies to waiting requests by id, so
//! responses may arrive in any order.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::McpServerConfig;
use super::error::McpError;
use super::protocol::{
    error_response, result_response, ClientCapabilities, ClientInfo, Inbound, InitializeParams,
    InitializeResult, McpMessage, McpNotification, McpRequest, McpToolDef, McpToolResult,
    ToolCallParams, ToolCallResult, ToolsListResult, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use super::transport::{connect_transport, Transport, TransportEvent};

type PendingMap = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value, McpError>>>>>;

/// Lifecycle of one server connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Disconnecting,
    Failed(String),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Handshaking => write!(f, "handshaking"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
            ConnectionState::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// MCP client for one server
pub struct McpClient {
    config: McpServerConfig,
    state: Arc<parking_lot::RwLock<ConnectionState>>,
    transport: parking_lot::RwLock<Option<Arc<dyn Transport>>>,
    next_id: AtomicI64,
    /// Pending request handlers
    pending: PendingMap,
    /// Cached tools from the last discovery
    tools: parking_lot::RwLock<Vec<McpToolDef>>,
    server_info: parking_lot::RwLock<Option<InitializeResult>>,
    receive_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Set while the client itself tears the connection down
    closing: Arc<AtomicBool>,
    /// Cleared as soon as the connection is known to be gone
    connected: Arc<AtomicBool>,
}

impl McpClient {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(parking_lot::RwLock::new(ConnectionState::Disconnected)),
            transport: parking_lot::RwLock::new(None),
            next_id: AtomicI64::new(1),
            pending: Arc::new(RwLock::new(HashMap::new())),
            tools: parking_lot::RwLock::new(Vec::new()),
            server_info: parking_lot::RwLock::new(None),
            receive_task: parking_lot::Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get server name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// Get cached tools
    pub fn tools(&self) -> Vec<McpToolDef> {
        self.tools.read().clone()
    }

    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("MCP {} -> {}", self.name(), state);
        *self.state.write() = state;
    }

    /// Open the configured transport and run the handshake
    pub async fn connect(&self, working_dir: &Path) -> Result<(), McpError> {
        self.begin_connect()?;
        info!("Connecting to MCP server: {}", self.name());

        let transport = match connect_transport(&self.config, working_dir).await {
            Ok(t) => t,
            Err(e) => {
                error!("MCP {} transport failed: {}", self.name(), e);
                self.set_state(ConnectionState::Failed(e.to_string()));
                return Err(e.into());
            }
        };

        self.handshake(transport).await
    }

    /// Run the handshake over an already open transport
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<(), McpError> {
        self.begin_connect()?;
        self.handshake(transport).await
    }

    fn begin_connect(&self) -> Result<(), McpError> {
        let mut state = self.state.write();
        match &*state {
            ConnectionState::Disconnected | ConnectionState::Failed(_) => {
                *state = ConnectionState::Connecting;
                self.closing.store(false, Ordering::SeqCst);
                Ok(())
            }
            other => Err(McpError::NotReady {
                server: self.config.name.clone(),
                state: other.to_string(),
            }),
        }
    }

    async fn handshake(&self, transport: Arc<dyn Transport>) -> Result<(), McpError> {
        let Some(inbound) = transport.take_inbound() else {
            let message = "Transport inbound channel already taken".to_string();
            self.set_state(ConnectionState::Failed(message.clone()));
            return Err(McpError::ConnectionClosed(message));
        };

        let previous = self.transport.write().replace(transport.clone());
        if let Some(previous) = previous {
            let _ = previous.close().await;
        }
        self.connected.store(true, Ordering::SeqCst);
        let task = tokio::spawn(receive_loop(
            self.config.name.clone(),
            inbound,
            transport.clone(),
            self.pending.clone(),
            self.state.clone(),
            self.closing.clone(),
            self.connected.clone(),
        ));
        *self.receive_task.lock() = Some(task);

        self.set_state(ConnectionState::Handshaking);

        match self.initialize().await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("MCP {} handshake failed: {}", self.name(), e);
                self.teardown().await;
                // Keep the specific cause over a generic transport close
                self.set_state(ConnectionState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "skiff".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        info!(
            "MCP {} initialized (protocol: {}, server: {})",
            self.name(),
            result.protocol_version,
            result
                .server_info
                .as_ref()
                .map(|s| s.name.as_str())
                .unwrap_or("unknown")
        );
        *self.server_info.write() = Some(result);

        self.notify("notifications/initialized", None).await?;
        self.list_tools().await?;
        Ok(())
    }

    /// Discover tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let page: ToolsListResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!("MCP {} has {} tools", self.name(), tools.len());
        for tool in &tools {
            debug!(
                "MCP {} tool '{}' schema: {}",
                self.name(),
                tool.name,
                tool.input_schema
            );
        }

        *self.tools.write() = tools.clone();
        Ok(tools)
    }

    /// Call a tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        let state = self.state();
        if !state.is_ready() {
            return Err(McpError::NotReady {
                server: self.config.name.clone(),
                state: state.to_string(),
            });
        }

        let params = ToolCallParams {
            name: name.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };

        let result: ToolCallResult = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;

        Ok(result.into())
    }

    /// Send a request and wait for its response
    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R, McpError> {
        let transport = self.current_transport()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&McpRequest::new(id, method, params))?;

        debug!("MCP {} request [{}]: {}", self.name(), id, method);

        // Register before sending so a fast reply is never missed
        let (tx, mut rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        // The receive loop may have drained pending before the insert
        if !self.connected.load(Ordering::SeqCst) {
            self.pending.write().await.remove(&id);
            return Err(McpError::ConnectionClosed("Connection lost".to_string()));
        }

        // The timeout covers the send too: HTTP transports wait on the POST
        let timeout = self.config.request_timeout;
        let exchange = async {
            tokio::select! {
                sent = transport.send(json) => sent?,
                reply = &mut rx => return reply_outcome(reply),
            }
            reply_outcome(rx.await)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(value)) => serde_json::from_value(value)
                .map_err(|e| McpError::InvalidResponse(format!("{}: {}", method, e))),
            Ok(Err(e)) => {
                self.pending.write().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                // Remove pending request on timeout; a late reply is dropped
                self.pending.write().await.remove(&id);
                warn!("MCP {} request [{}] {} timed out", self.name(), id, method);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let transport = self.current_transport()?;
        let json = serde_json::to_string(&McpNotification::new(method, params))?;
        debug!("MCP {} notify: {}", self.name(), method);
        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, transport.send(json))
            .await
            .map_err(|_| McpError::Timeout {
                method: method.to_string(),
                timeout,
            })??;
        Ok(())
    }

    fn current_transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        self.transport.read().clone().ok_or_else(|| McpError::NotReady {
            server: self.config.name.clone(),
            state: self.state().to_string(),
        })
    }

    /// Close the connection and fail anything still waiting
    pub async fn close(&self) {
        if matches!(self.state(), ConnectionState::Disconnected) {
            return;
        }
        info!("Disconnecting MCP server: {}", self.name());
        self.set_state(ConnectionState::Disconnecting);
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn teardown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!("MCP {} transport close error: {}", self.name(), e);
            }
        }

        let task = self.receive_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }

        fail_pending(&self.pending, "Connection closed by client").await;
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(task) = self.receive_task.lock().take() {
            task.abort();
        }
    }
}

fn reply_outcome(
    reply: Result<Result<Value, McpError>, oneshot::error::RecvError>,
) -> Result<Value, McpError> {
    reply.unwrap_or_else(|_| Err(McpError::ConnectionClosed("Request cancelled".to_string())))
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut pending = pending.write().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(McpError::ConnectionClosed(reason.to_string())));
    }
}

/// Route inbound frames until the transport closes
async fn receive_loop(
    name: String,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    state: Arc<parking_lot::RwLock<ConnectionState>>,
    closing: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    let reason = loop {
        match inbound.recv().await {
            Some(TransportEvent::Frame(frame)) => {
                handle_frame(&name, &frame, transport.as_ref(), &pending).await;
            }
            Some(TransportEvent::Closed { reason }) => break reason,
            None => break "Transport dropped".to_string(),
        }
    };

    connected.store(false, Ordering::SeqCst);
    fail_pending(&pending, &reason).await;

    if !closing.load(Ordering::SeqCst) {
        error!("MCP {} connection lost: {}", name, reason);
        *state.write() = ConnectionState::Failed(reason);
    } else {
        debug!("MCP {} receive loop finished: {}", name, reason);
    }
}

/// Handle an incoming frame (called by receive loop)
async fn handle_frame(name: &str, frame: &str, transport: &dyn Transport, pending: &PendingMap) {
    let message: McpMessage = match serde_json::from_str(frame) {
        Ok(m) => m,
        Err(e) => {
            warn!("MCP {} sent an unparseable message: {}", name, e);
            return;
        }
    };

    match message.classify() {
        Inbound::Response { id, outcome } => {
            let Some(tx) = pending.write().await.remove(&id) else {
                debug!("MCP {} response for unknown or expired id {}", name, id);
                return;
            };
            let _ = tx.send(outcome.map_err(|e| McpError::Rpc {
                code: e.code,
                message: e.message,
            }));
        }
        Inbound::Request { id, method } => {
            let reply = if method == "ping" {
                result_response(&id, serde_json::json!({}))
            } else {
                debug!("MCP {} unsupported server request: {}", name, method);
                error_response(&id, METHOD_NOT_FOUND, &format!("Method not found: {}", method))
            };
            if let Err(e) = transport.send(reply.to_string()).await {
                warn!("MCP {} failed to answer {}: {}", name, method, e);
            }
        }
        Inbound::Notification { method } => {
            debug!("MCP {} notification: {}", name, method);
        }
        Inbound::Invalid(reason) => {
            warn!("MCP {} sent an invalid message: {}", name, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::format_mcp_result;
    use crate::mcp::transport::mock::{mock_pair, text_result};
    use serde_json::json;
    use std::time::Duration;

    fn config(name: &str) -> McpServerConfig {
        McpServerConfig::stdio(name, "unused", vec![]).with_request_timeout(Duration::from_secs(2))
    }

    fn echo_tool() -> Value {
        json!([{"name": "echo", "description": "Echo input", "inputSchema": {"type": "object"}}])
    }

    #[tokio::test]
    async fn test_handshake_discovers_tools() {
        let (transport, mut server) = mock_pair();
        let client = McpClient::new(config("files"));

        let server_task = tokio::spawn(async move {
            let init = server.next_request().await.unwrap();
            assert_eq!(init["method"], "initialize");
            assert_eq!(init["params"]["protocolVersion"], PROTOCOL_VERSION);
            server.reply(&init["id"], json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {}}));

            let initialized = server.next().await.unwrap();
            assert_eq!(initialized["method"], "notifications/initialized");
            assert!(initialized.get("id").is_none());

            let list = server.next_request().await.unwrap();
            assert_eq!(list["method"], "tools/list");
            server.reply(&list["id"], json!({"tools": echo_tool()}));
            server
        });

        client.connect_with(Arc::new(transport)).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(client.tools()[0].name, "echo");
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_out_of_order_replies() {
        let (transport, mut server) = mock_pair();
        let client = Arc::new(McpClient::new(config("files")));

        let server_task = tokio::spawn(async move {
            server.handshake(echo_tool()).await;
            let first = server.next_request().await.unwrap();
            let second = server.next_request().await.unwrap();
            // Answer in reverse order
            for request in [&second, &first] {
                let text = request["params"]["arguments"]["text"].as_str().unwrap().to_string();
                server.reply(&request["id"], text_result(&text));
            }
            server
        });

        client.connect_with(Arc::new(transport)).await.unwrap();

        let a = {
            let client = client.clone();
            tokio::spawn(async move { client.call_tool("echo", json!({"text": "a"})).await })
        };
        // Make sure "a" is sent first
        tokio::task::yield_now().await;
        let b = {
            let client = client.clone();
            tokio::spawn(async move { client.call_tool("echo", json!({"text": "b"})).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(format_mcp_result(&a), "a");
        assert_eq!(format_mcp_result(&b), "b");
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_request_timeout_then_late_reply_ignored() {
        let (transport, mut server) = mock_pair();
        let client = McpClient::new(
            McpServerConfig::stdio("slow", "unused", vec![])
                .with_request_timeout(Duration::from_millis(100)),
        );

        let server_task = tokio::spawn(async move {
            server.handshake(echo_tool()).await;
            let call = server.next_request().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            server.reply(&call["id"], text_result("late"));
            server
        });

        client.connect_with(Arc::new(transport)).await.unwrap();
        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));

        let _server = server_task.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.pending.read().await.is_empty());
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_answers_ping_and_rejects_unknown_requests() {
        let (transport, mut server) = mock_pair();
        let client = McpClient::new(config("files"));

        let server_task = tokio::spawn(async move {
            server.handshake(echo_tool()).await;
            server.push(json!({"jsonrpc": "2.0", "id": "p1", "method": "ping"}));
            let pong = server.next().await.unwrap();
            server.push(json!({"jsonrpc": "2.0", "id": 77, "method": "sampling/createMessage"}));
            let refused = server.next().await.unwrap();
            (pong, refused)
        });

        client.connect_with(Arc::new(transport)).await.unwrap();
        let (pong, refused) = server_task.await.unwrap();
        assert_eq!(pong["id"], "p1");
        assert_eq!(pong["result"], json!({}));
        assert_eq!(refused["id"], 77);
        assert_eq!(refused["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_initialize_marks_failed() {
        let (transport, mut server) = mock_pair();
        let client = McpClient::new(config("broken"));

        let server_task = tokio::spawn(async move {
            let init = server.next_request().await.unwrap();
            server.reply_error(&init["id"], -32603, "boom");
            server
        });

        let err = client.connect_with(Arc::new(transport)).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32603, .. }));
        assert!(matches!(client.state(), ConnectionState::Failed(_)));

        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::NotReady { .. }));
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_transport_close_fails_pending_calls() {
        let (transport, mut server) = mock_pair();
        let client = McpClient::new(config("flaky"));

        let server_task = tokio::spawn(async move {
            server.handshake(echo_tool()).await;
            let _call = server.next_request().await.unwrap();
            server.close("server crashed");
            server
        });

        client.connect_with(Arc::new(transport)).await.unwrap();
        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        match err {
            McpError::ConnectionClosed(reason) => assert_eq!(reason, "server crashed"),
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }

        drop(server_task.await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            client.state(),
            ConnectionState::Failed("server crashed".to_string())
        );
    }

    #[tokio::test]
    async fn test_close_is_clean() {
        let (transport, server) = mock_pair();
        let client = McpClient::new(config("files"));
        let server_task = server.spawn_with(echo_tool(), |_, _| Ok(text_result("ok")));

        client.connect_with(Arc::new(transport)).await.unwrap();
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.call_tool("echo", json!({})).await.is_err());
        server_task.abort();
    }

    #[tokio::test]
    async fn test_close_rejects_in_flight_call() {
        let (transport, mut server) = mock_pair();
        let client = Arc::new(McpClient::new(
            McpServerConfig::stdio("files", "unused", vec![])
                .with_request_timeout(Duration::from_secs(30)),
        ));

        let server_task = tokio::spawn(async move {
            server.handshake(echo_tool()).await;
            // Read the call and never answer it
            let _call = server.next_request().await.unwrap();
            server
        });
        client.connect_with(Arc::new(transport)).await.unwrap();

        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.call_tool("echo", json!({})).await })
        };
        let _server = server_task.await.unwrap();

        client.close().await;
        let err = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("call should end before its request timeout")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_hanging_http_server_fails_handshake() {
        use axum::routing::post;
        use axum::Router;

        let app = Router::new().route(
            "/mcp",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                "never"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = McpClient::new(
            McpServerConfig::new(
                "stuck",
                crate::mcp::config::TransportConfig::Http {
                    url: format!("http://{}/mcp", addr),
                    headers: HashMap::new(),
                },
            )
            .with_request_timeout(Duration::from_millis(200)),
        );

        let result = tokio::time::timeout(Duration::from_secs(5), client.connect(&std::env::temp_dir()))
            .await
            .expect("connect should give up on its own");
        assert!(result.is_err());
        assert!(matches!(client.state(), ConnectionState::Failed(_)));
        assert!(client.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_stdio_server_that_exits_fails_handshake() {
        let client = McpClient::new(McpServerConfig::stdio(
            "dead",
            "sh",
            vec!["-c".to_string(), "exit 3".to_string()],
        ));
        let err = client.connect(&std::env::temp_dir()).await.unwrap_err();
        assert!(
            matches!(err, McpError::ConnectionClosed(_) | McpError::Transport(_)),
            "unexpected error {:?}",
            err
        );
        assert!(matches!(client.state(), ConnectionState::Failed(_)));
    }
}
