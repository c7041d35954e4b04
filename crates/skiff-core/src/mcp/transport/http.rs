//! Streamable HTTP transport
//!
//! Every outbound message is a POST. The reply comes back in the response body,
//! either as plain JSON or as a short SSE stream. Notifications get 202/204.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{headers_from_map, parse_url, InboundSink, InboundSlot, Transport, TransportEvent, TransportKind};
use crate::mcp::error::TransportError;
use crate::mcp::protocol::{error_response, INTERNAL_ERROR};
use crate::sse::{SseDecoder, SseEvent};

const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpTransport {
    label: String,
    client: reqwest::Client,
    url: url::Url,
    headers: HeaderMap,
    request_timeout: Duration,
    session_id: parking_lot::RwLock<Option<String>>,
    sink: InboundSink,
    inbound: InboundSlot,
    /// Readers draining SSE response bodies
    streams: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(
        label: &str,
        url: &str,
        headers: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = parse_url(url)?;
        let headers = headers_from_map(headers)?;
        let client = reqwest::Client::builder().build()?;
        let (sink, rx) = InboundSink::channel();

        tracing::info!(server = label, "Using streamable HTTP transport at {}", url);

        Ok(Self {
            label: label.to_string(),
            client,
            url,
            headers,
            request_timeout,
            session_id: parking_lot::RwLock::new(None),
            sink,
            inbound: InboundSlot::new(rx),
            streams: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn session_header(&self) -> Option<HeaderValue> {
        self.session_id
            .read()
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
    }

    fn track(&self, reader: JoinHandle<()>) {
        let mut streams = self.streams.lock();
        streams.retain(|handle| !handle.is_finished());
        streams.push(reader);
    }
}

/// Whether a `message` event carries the reply to `id`
fn answers(event: &SseEvent, id: &Value) -> bool {
    match serde_json::from_str::<Value>(&event.data) {
        Ok(Value::Array(items)) => items.iter().any(|item| item.get("id") == Some(id)),
        Ok(message) => message.get("id") == Some(id),
        Err(_) => false,
    }
}

/// Forward an SSE response body. A request whose stream breaks or ends
/// without its reply gets an error reply, so the caller is not left waiting.
async fn read_response_stream(
    label: String,
    response: reqwest::Response,
    request_id: Option<Value>,
    sink: InboundSink,
) {
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();
    let mut replied = false;
    let deliver = |event: SseEvent, replied: &mut bool| {
        if event.kind() != "message" {
            return;
        }
        if let Some(id) = &request_id {
            *replied |= answers(&event, id);
        }
        sink.body(&event.data);
    };

    let failure = loop {
        match stream.next().await {
            Some(Ok(bytes)) => {
                for event in decoder.push(&bytes) {
                    deliver(event, &mut replied);
                }
            }
            Some(Err(e)) => {
                tracing::warn!(server = %label, "SSE response read error: {}", e);
                break Some(format!("Response stream failed: {}", e));
            }
            None => {
                if let Some(event) = decoder.finish() {
                    deliver(event, &mut replied);
                }
                break None;
            }
        }
    };

    if replied {
        return;
    }
    if let Some(id) = request_id {
        let reason = failure.unwrap_or_else(|| "Response stream ended without a reply".to_string());
        sink.frame(error_response(&id, INTERNAL_ERROR, &reason).to_string());
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.sink.is_closed() {
            return Err(TransportError::Closed);
        }

        let request_id = serde_json::from_str::<Value>(&frame)
            .ok()
            .filter(|message| message.get("method").is_some())
            .and_then(|message| message.get("id").cloned());

        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .timeout(self.request_timeout)
            .body(frame);
        if let Some(session) = self.session_header() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_string());
        }

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            // Drain in the background; the reply is routed by id
            let reader = tokio::spawn(read_response_stream(
                self.label.clone(),
                response,
                request_id,
                self.sink.clone(),
            ));
            self.track(reader);
            return Ok(());
        }

        if content_type.starts_with("application/json") {
            let body = response.text().await?;
            self.sink.body(&body);
            return Ok(());
        }

        Err(TransportError::UnexpectedContentType(content_type))
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inbound.take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.sink.is_closed() {
            return Ok(());
        }
        self.sink.close("Transport closed");

        let streams: Vec<_> = self.streams.lock().drain(..).collect();
        for reader in streams {
            reader.abort();
        }

        let Some(session) = self.session_header() else {
            return Ok(());
        };

        // Ending the session is best effort; servers may not support DELETE
        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .timeout(self.request_timeout)
            .send()
            .await;
        match result {
            Ok(response)
                if response.status().is_success()
                    || response.status() == StatusCode::METHOD_NOT_ALLOWED => {}
            Ok(response) => {
                tracing::debug!(server = %self.label, "Session DELETE returned {}", response.status())
            }
            Err(e) => tracing::debug!(server = %self.label, "Session DELETE failed: {}", e),
        }
        Ok(())
    }
}
