//! Streaming API calls
//!
//! Reads the chat/completions SSE body and lowers each `data:` payload into
//! `StreamPart`s on an unbounded channel.

use futures::StreamExt;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{ensure_success, ModelError, ModelRequest, OpenAiClient};
use crate::ai::parsers::openai::parse_chunk;
use crate::ai::streaming::StreamPart;
use crate::sse::{SseDecoder, SseEvent};

const DONE_SENTINEL: &str = "[DONE]";

/// Spawn a stream processing task for an HTTP SSE response.
///
/// Sends an explicit error part if the stream fails so the receiver never
/// waits on a silently dead channel. Dropping the sender closes the channel.
fn spawn_sse_stream_task<S>(stream: S, tx: mpsc::UnboundedSender<StreamPart>)
where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::pin!(stream);
        let mut decoder = SseDecoder::new();
        let mut chunk_count: u64 = 0;

        while let Some(chunk) = stream.next().await {
            chunk_count += 1;
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push(&bytes) {
                        if !forward_event(&event, &tx) {
                            info!("Model stream ended after {} chunks", chunk_count);
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Model stream read error at chunk #{}: {}", chunk_count, e);
                    let _ = tx.send(StreamPart::Error {
                        error: format!("Stream read error: {}", e),
                    });
                    return;
                }
            }
        }

        if let Some(event) = decoder.finish() {
            forward_event(&event, &tx);
        }
        info!("Model stream closed after {} chunks", chunk_count);
    });
}

/// Forward one SSE event. Returns false once the stream should stop.
fn forward_event(event: &SseEvent, tx: &mpsc::UnboundedSender<StreamPart>) -> bool {
    let data = event.data.trim();
    if data.is_empty() {
        return true;
    }
    if data == DONE_SENTINEL {
        return false;
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(json) => {
            for part in parse_chunk(&json) {
                let terminal = matches!(part, StreamPart::Error { .. });
                if tx.send(part).is_err() {
                    debug!("Stream receiver dropped");
                    return false;
                }
                if terminal {
                    return false;
                }
            }
            true
        }
        Err(e) => {
            warn!("Unparseable stream payload: {} ({})", data, e);
            let _ = tx.send(StreamPart::Error {
                error: format!("Stream parse error: {}", e),
            });
            false
        }
    }
}

impl OpenAiClient {
    /// Start a streaming chat/completions call
    pub(super) async fn call_streaming(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, ModelError> {
        let body = self.build_body(&request, true);
        let call_start = Instant::now();
        debug!(
            "Streaming request: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response = self.build_request().json(&body).send().await?;
        info!(
            "Model API response: {} in {:?}",
            response.status(),
            call_start.elapsed()
        );
        let response = ensure_success(response).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_sse_stream_task(response.bytes_stream(), tx);
        Ok(rx)
    }
}
