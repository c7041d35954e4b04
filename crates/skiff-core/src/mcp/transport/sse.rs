//! Legacy SSE transport
//!
//! Opens a long-lived GET event stream. The server first announces the URL
//! that accepts outbound messages (`endpoint` event), then delivers every
//! reply and server request as a `message` event.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{headers_from_map, parse_url, InboundSink, InboundSlot, Transport, TransportEvent, TransportKind};
use crate::mcp::error::TransportError;
use crate::sse::{SseDecoder, SseEvent};

type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

pub struct SseTransport {
    label: String,
    client: reqwest::Client,
    headers: HeaderMap,
    endpoint: url::Url,
    request_timeout: Duration,
    sink: InboundSink,
    inbound: InboundSlot,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its endpoint.
    /// `request_timeout` bounds the handshake and every later POST.
    pub async fn connect(
        label: &str,
        url: &str,
        headers: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream_url = parse_url(url)?;
        let headers = headers_from_map(headers)?;
        let client = reqwest::Client::builder().build()?;

        tracing::info!(server = label, "Opening SSE stream at {}", stream_url);

        let response = tokio::time::timeout(
            request_timeout,
            client
                .get(stream_url.clone())
                .headers(headers.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| TransportError::Timeout(request_timeout, "the SSE stream to open"))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream: ByteStream = response.bytes_stream().boxed();
        let mut decoder = SseDecoder::new();

        let (endpoint_data, early) = tokio::time::timeout(
            request_timeout,
            wait_for_endpoint(&mut stream, &mut decoder),
        )
        .await
        .map_err(|_| TransportError::Timeout(request_timeout, "the SSE endpoint event"))??;

        let endpoint = resolve_endpoint(&stream_url, &endpoint_data)?;
        tracing::debug!(server = label, "SSE message endpoint: {}", endpoint);

        let (sink, rx) = InboundSink::channel();
        for event in early {
            forward(&sink, &event);
        }

        let reader = tokio::spawn(read_events(label.to_string(), stream, decoder, sink.clone()));

        Ok(Self {
            label: label.to_string(),
            client,
            headers,
            endpoint,
            request_timeout,
            sink,
            inbound: InboundSlot::new(rx),
            reader: parking_lot::Mutex::new(Some(reader)),
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

/// Read until the `endpoint` event, keeping any messages that arrive first
async fn wait_for_endpoint(
    stream: &mut ByteStream,
    decoder: &mut SseDecoder,
) -> Result<(String, Vec<SseEvent>), TransportError> {
    let mut early = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let mut events = decoder.push(&chunk).into_iter();
        while let Some(event) = events.next() {
            if event.kind() == "endpoint" {
                // Anything decoded after the endpoint in this chunk still counts
                early.extend(events);
                return Ok((event.data.trim().to_string(), early));
            }
            early.push(event);
        }
    }
    Err(TransportError::MissingEndpoint)
}

/// Endpoints may be absolute, path-absolute, or relative to the stream URL
fn resolve_endpoint(base: &url::Url, endpoint: &str) -> Result<url::Url, TransportError> {
    base.join(endpoint).map_err(|e| TransportError::InvalidUrl {
        url: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn forward(sink: &InboundSink, event: &SseEvent) {
    match event.kind() {
        "message" => sink.body(&event.data),
        "endpoint" => tracing::debug!("Ignoring repeated endpoint event"),
        other => tracing::debug!("Ignoring SSE event '{}'", other),
    }
}

async fn read_events(label: String, mut stream: ByteStream, mut decoder: SseDecoder, sink: InboundSink) {
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.push(&bytes) {
                    forward(&sink, &event);
                }
            }
            Err(e) => {
                tracing::warn!(server = %label, "SSE stream error: {}", e);
                sink.close(format!("SSE stream error: {}", e));
                return;
            }
        }
    }
    if let Some(event) = decoder.finish() {
        forward(&sink, &event);
    }
    tracing::info!(server = %label, "SSE stream ended");
    sink.close("SSE stream ended");
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.sink.is_closed() {
            return Err(TransportError::Closed);
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.request_timeout)
            .body(frame)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inbound.take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
            tracing::debug!(server = %self.label, "SSE reader stopped");
        }
        self.sink.close("Transport closed");
        Ok(())
    }
}
