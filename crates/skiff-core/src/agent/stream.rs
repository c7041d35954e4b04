//! Stream processing for the agentic loop.
//!
//! Drives the `StreamAssembler` from the client's channel and:
//! - Appends content deltas to the streaming assistant entry
//! - Emits `AgentEvent`s for content, token counts and tool calls
//! - Handles the inactivity timeout and turn cancellation

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::assembler::{AssemblerEvent, StreamAssembler};
use crate::ai::streaming::StreamPart;
use crate::ai::types::{ToolCallRequest, Usage};

use super::conversation::{ConversationEntry, ConversationLog};
use super::loop_events::AgentEvent;

/// Default inactivity bound on a model stream
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of processing one model response.
#[derive(Debug, Default)]
pub(crate) struct StreamOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
    pub error: Option<String>,
    pub cancelled: bool,
    /// Whether a streaming assistant entry was pushed to the log
    pub opened_entry: bool,
}

/// Process a model response, emitting events as fragments arrive.
///
/// Error and Done are left to the caller, which decides how the turn ends.
pub(crate) async fn process_stream(
    mut api_rx: mpsc::UnboundedReceiver<StreamPart>,
    event_tx: &mpsc::UnboundedSender<AgentEvent>,
    log: &ConversationLog,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> StreamOutcome {
    let mut assembler = StreamAssembler::new();
    let mut outcome = StreamOutcome::default();

    while !assembler.is_done() {
        let events = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                break;
            }
            received = tokio::time::timeout(idle_timeout, api_rx.recv()) => match received {
                Ok(Some(part)) => assembler.push(part),
                Ok(None) => assembler.end_of_stream(),
                Err(_) => {
                    tracing::warn!("Model stream idle for {}s, giving up", idle_timeout.as_secs());
                    outcome.error = Some(format!(
                        "Model stream timed out: no data received for {} seconds",
                        idle_timeout.as_secs()
                    ));
                    break;
                }
            },
        };

        for event in events {
            match event {
                AssemblerEvent::ContentDelta(delta) => {
                    if outcome.opened_entry {
                        log.update_last(|entry| entry.content.push_str(&delta));
                    } else {
                        let mut entry = ConversationEntry::streaming_assistant();
                        entry.content.push_str(&delta);
                        log.push(entry);
                        outcome.opened_entry = true;
                    }
                    let _ = event_tx.send(AgentEvent::ContentDelta { content: delta });
                }
                AssemblerEvent::ToolCalls(tool_calls) => {
                    let _ = event_tx.send(AgentEvent::ToolCalls { tool_calls });
                }
                AssemblerEvent::TokenCount(usage) => {
                    let _ = event_tx.send(AgentEvent::TokenCount { usage });
                }
                AssemblerEvent::Error(error) => {
                    outcome.error = Some(error);
                }
                AssemblerEvent::Done => {}
            }
        }
    }

    outcome.text = assembler.text().to_string();
    outcome.usage = assembler.usage().cloned();
    if outcome.error.is_none() && !outcome.cancelled {
        outcome.tool_calls = assembler.tool_calls().to_vec();
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::FinishReason;
    use crate::agent::conversation::EntryKind;

    fn feed(parts: Vec<StreamPart>, close: bool) -> mpsc::UnboundedReceiver<StreamPart> {
        let (tx, rx) = mpsc::unbounded_channel();
        for part in parts {
            tx.send(part).unwrap();
        }
        if !close {
            std::mem::forget(tx);
        }
        rx
    }

    #[tokio::test]
    async fn test_deltas_build_streaming_entry() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let log = ConversationLog::new();
        let rx = feed(
            vec![
                StreamPart::text("Hel"),
                StreamPart::text("lo"),
                StreamPart::tool_start(0, "call_a", "bash"),
                StreamPart::arguments(0, r#"{"command":"ls"}"#),
                StreamPart::finish(FinishReason::ToolCalls),
            ],
            true,
        );

        let outcome =
            process_stream(rx, &event_tx, &log, &CancellationToken::new(), STREAM_TIMEOUT).await;
        assert_eq!(outcome.text, "Hello");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.error.is_none());

        let entry = log.last().unwrap();
        assert_eq!(entry.kind, EntryKind::Assistant);
        assert_eq!(entry.content, "Hello");
        assert!(entry.is_streaming);

        assert!(matches!(event_rx.recv().await, Some(AgentEvent::ContentDelta { .. })));
        assert!(matches!(event_rx.recv().await, Some(AgentEvent::ContentDelta { .. })));
        assert!(matches!(event_rx.recv().await, Some(AgentEvent::ToolCalls { .. })));
    }

    #[tokio::test]
    async fn test_early_close_reports_error_and_drops_calls() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let log = ConversationLog::new();
        let rx = feed(
            vec![
                StreamPart::tool_start(0, "call_a", "bash"),
                StreamPart::arguments(0, r#"{"comm"#),
            ],
            true,
        );
        let outcome =
            process_stream(rx, &event_tx, &log, &CancellationToken::new(), STREAM_TIMEOUT).await;
        assert!(outcome.error.is_some());
        assert!(outcome.tool_calls.is_empty());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let rx = feed(vec![StreamPart::text("partial")], false);
        let outcome = process_stream(
            rx,
            &event_tx,
            &ConversationLog::new(),
            &CancellationToken::new(),
            Duration::from_millis(50),
        )
        .await;
        assert!(outcome.error.unwrap().contains("timed out"));
        assert_eq!(outcome.text, "partial");
    }

    #[tokio::test]
    async fn test_cancellation_stops_stream() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let rx = feed(vec![], false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome =
            process_stream(rx, &event_tx, &ConversationLog::new(), &cancel, STREAM_TIMEOUT).await;
        assert!(outcome.cancelled);
        assert!(outcome.error.is_none());
    }
}
