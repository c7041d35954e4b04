//! MCP transports
//!
//! A transport moves complete JSON-RPC frames to and from one server. Inbound
//! frames are delivered on a channel handed out once by [`Transport::take_inbound`];
//! the channel always ends with a single [`TransportEvent::Closed`].

mod http;
mod sse;
mod stdio;

#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::config::{McpServerConfig, TransportConfig};
use super::error::TransportError;

/// Inbound event from a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One complete JSON-RPC message
    Frame(String),
    /// The connection is gone; no further frames follow
    Closed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
        };
        write!(f, "{}", name)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Send one complete JSON-RPC frame
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Take the inbound event channel. Only the first call returns it.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Open a transport for a configured server
pub async fn connect_transport(
    config: &McpServerConfig,
    working_dir: &Path,
) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match &config.transport {
        TransportConfig::Stdio { command, args, env } => {
            Arc::new(StdioTransport::spawn(&config.name, command, args, env, working_dir).await?)
        }
        TransportConfig::Http { url, headers } => {
            Arc::new(HttpTransport::new(&config.name, url, headers, config.request_timeout)?)
        }
        TransportConfig::Sse { url, headers } => {
            Arc::new(SseTransport::connect(&config.name, url, headers, config.request_timeout).await?)
        }
    };
    Ok(transport)
}

/// Build a header map from configured string pairs
pub fn headers_from_map(headers: &HashMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| TransportError::InvalidHeader(format!("{}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidHeader(format!("{}: {}", key, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

pub(crate) fn parse_url(url: &str) -> Result<url::Url, TransportError> {
    url::Url::parse(url).map_err(|e| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Sending half of a transport's inbound channel
///
/// Guarantees at most one `Closed` event and no frames after it.
#[derive(Clone)]
pub(crate) struct InboundSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl InboundSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Deliver a frame. Returns false once the channel is closed.
    pub(crate) fn frame(&self, frame: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(TransportEvent::Frame(frame)).is_ok()
    }

    /// Deliver every message in a body that may hold a single message or a batch
    pub(crate) fn body(&self, body: &str) {
        let body = body.trim();
        if body.is_empty() {
            return;
        }
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Array(items)) => {
                for item in items {
                    self.frame(item.to_string());
                }
            }
            _ => {
                self.frame(body.to_string());
            }
        }
    }

    pub(crate) fn close(&self, reason: impl Into<String>) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(TransportEvent::Closed {
                reason: reason.into(),
            });
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Holder for the receiving half until a client takes it
pub(crate) struct InboundSlot(parking_lot::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>);

impl InboundSlot {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self(parking_lot::Mutex::new(Some(rx)))
    }

    pub(crate) fn take(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.0.lock().take()
    }
}
