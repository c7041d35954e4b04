//! In-memory transport for exercising the client without a real server

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{InboundSink, InboundSlot, Transport, TransportEvent, TransportKind};
use crate::mcp::error::TransportError;

pub(crate) struct MockTransport {
    outbound: mpsc::UnboundedSender<String>,
    sink: InboundSink,
    inbound: InboundSlot,
}

/// The server side of a [`MockTransport`]
pub(crate) struct MockServer {
    requests: mpsc::UnboundedReceiver<String>,
    sink: InboundSink,
}

pub(crate) fn mock_pair() -> (MockTransport, MockServer) {
    let (outbound, requests) = mpsc::unbounded_channel();
    let (sink, rx) = InboundSink::channel();
    (
        MockTransport {
            outbound,
            sink: sink.clone(),
            inbound: InboundSlot::new(rx),
        },
        MockServer { requests, sink },
    )
}

impl MockServer {
    /// Next message the client sent, or None once the client side is gone
    pub(crate) async fn next(&mut self) -> Option<Value> {
        let frame = self.requests.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Next message that expects a reply
    pub(crate) async fn next_request(&mut self) -> Option<Value> {
        loop {
            let message = self.next().await?;
            if message.get("id").is_some() && message.get("method").is_some() {
                return Some(message);
            }
        }
    }

    pub(crate) fn push(&self, message: Value) {
        self.sink.frame(message.to_string());
    }

    pub(crate) fn reply(&self, id: &Value, result: Value) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    pub(crate) fn reply_error(&self, id: &Value, code: i64, message: &str) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}));
    }

    pub(crate) fn close(&self, reason: &str) {
        self.sink.close(reason);
    }

    /// Answer initialize and tools/list, returning once the handshake is done
    pub(crate) async fn handshake(&mut self, tools: Value) {
        while let Some(request) = self.next_request().await {
            let id = request["id"].clone();
            match request["method"].as_str() {
                Some("initialize") => self.reply(
                    &id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock", "version": "1.0"}
                    }),
                ),
                Some("tools/list") => {
                    self.reply(&id, json!({ "tools": tools }));
                    return;
                }
                _ => self.reply_error(&id, -32601, "Method not found"),
            }
        }
    }

    /// Serve a handshake, then answer every tools/call with `respond`
    pub(crate) fn spawn_with<F>(mut self, tools: Value, respond: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&str, &Value) -> Result<Value, (i64, String)> + Send + 'static,
    {
        tokio::spawn(async move {
            self.handshake(tools).await;
            while let Some(request) = self.next_request().await {
                let id = request["id"].clone();
                if request["method"] == "tools/call" {
                    let name = request["params"]["name"].as_str().unwrap_or_default();
                    let args = request["params"]["arguments"].clone();
                    match respond(name, &args) {
                        Ok(result) => self.reply(&id, result),
                        Err((code, message)) => self.reply_error(&id, code, &message),
                    }
                } else {
                    self.reply(&id, json!({}));
                }
            }
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.sink.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inbound.take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.close("Transport closed");
        Ok(())
    }
}

/// Tool result in the shape tools/call returns
pub(crate) fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": false})
}
