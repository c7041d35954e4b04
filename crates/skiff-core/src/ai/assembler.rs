//! Streaming response assembler
//!
//! A pure reducer over `StreamPart`s. It rebuilds the assistant text and the
//! requested tool calls from incremental fragments without touching the
//! network, which is what makes it testable in isolation.
//!
//! Event order for a well-formed stream:
//! - `ContentDelta` for every non-empty text fragment
//! - `ToolCalls` as soon as the terminal `Finish` arrives (if any calls were seen)
//! - `TokenCount` once the stream ends, if usage metadata was present
//! - `Done`
//!
//! Usage is reported at end of stream because OpenAI-compatible providers send
//! the usage chunk after the chunk carrying `finish_reason`.

use std::collections::BTreeMap;

use super::streaming::StreamPart;
use super::types::{FinishReason, ToolCallRequest, Usage};

/// Output of the assembler
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerEvent {
    ContentDelta(String),
    ToolCalls(Vec<ToolCallRequest>),
    TokenCount(Usage),
    Error(String),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    /// Terminal signal received, waiting for the stream to close
    Finished,
    Done,
}

/// Tool call accumulated by index
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn complete(self, index: usize) -> ToolCallRequest {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("call_{}", index));
        ToolCallRequest::from_raw(id, self.name, self.arguments)
    }
}

/// Reducer state for one model response
#[derive(Debug)]
pub struct StreamAssembler {
    text: String,
    accumulators: BTreeMap<usize, ToolCallAccumulator>,
    tool_calls: Vec<ToolCallRequest>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    error: Option<String>,
    phase: Phase,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            accumulators: BTreeMap::new(),
            tool_calls: Vec::new(),
            usage: None,
            finish_reason: None,
            error: None,
            phase: Phase::Streaming,
        }
    }

    /// Apply one fragment
    pub fn push(&mut self, part: StreamPart) -> Vec<AssemblerEvent> {
        if self.phase == Phase::Done {
            tracing::trace!("Ignoring stream part after completion: {:?}", part);
            return Vec::new();
        }

        match part {
            StreamPart::TextDelta { delta } => {
                if self.phase != Phase::Streaming || delta.is_empty() {
                    return Vec::new();
                }
                self.text.push_str(&delta);
                vec![AssemblerEvent::ContentDelta(delta)]
            }
            StreamPart::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                if self.phase != Phase::Streaming {
                    tracing::warn!(index, "Tool call fragment after finish, ignoring");
                    return Vec::new();
                }
                let acc = self.accumulators.entry(index).or_default();
                if let Some(id) = id.filter(|id| !id.is_empty()) {
                    if acc.id.is_none() {
                        acc.id = Some(id);
                    }
                }
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    if acc.name.is_empty() {
                        acc.name = name;
                    }
                }
                if let Some(arguments) = arguments {
                    acc.arguments.push_str(&arguments);
                }
                Vec::new()
            }
            StreamPart::Usage { usage } => {
                self.usage = Some(usage);
                Vec::new()
            }
            StreamPart::Finish { reason } => {
                if self.phase != Phase::Streaming {
                    return Vec::new();
                }
                self.phase = Phase::Finished;
                self.finish_reason = Some(reason);

                let accumulators = std::mem::take(&mut self.accumulators);
                self.tool_calls = accumulators
                    .into_iter()
                    .map(|(index, acc)| acc.complete(index))
                    .collect();

                for call in &self.tool_calls {
                    if let Some(err) = &call.argument_error {
                        tracing::warn!(
                            id = %call.id,
                            tool = %call.name,
                            "Tool call arguments did not parse: {}",
                            err
                        );
                    }
                }

                if self.tool_calls.is_empty() {
                    Vec::new()
                } else {
                    vec![AssemblerEvent::ToolCalls(self.tool_calls.clone())]
                }
            }
            StreamPart::Error { error } => {
                self.phase = Phase::Done;
                self.error = Some(error.clone());
                self.accumulators.clear();
                vec![AssemblerEvent::Error(error), AssemblerEvent::Done]
            }
        }
    }

    /// Signal that the underlying stream has closed
    pub fn end_of_stream(&mut self) -> Vec<AssemblerEvent> {
        match self.phase {
            Phase::Done => Vec::new(),
            Phase::Finished => {
                self.phase = Phase::Done;
                let mut events = Vec::new();
                if let Some(usage) = &self.usage {
                    events.push(AssemblerEvent::TokenCount(usage.clone()));
                }
                events.push(AssemblerEvent::Done);
                events
            }
            Phase::Streaming => {
                self.phase = Phase::Done;
                if !self.accumulators.is_empty() {
                    tracing::warn!(
                        pending = self.accumulators.len(),
                        "Stream closed before completion, discarding partial tool calls"
                    );
                }
                self.accumulators.clear();
                let error = "Model stream ended before a finish signal".to_string();
                self.error = Some(error.clone());
                vec![AssemblerEvent::Error(error), AssemblerEvent::Done]
            }
        }
    }

    /// Full assistant text seen so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Completed tool calls (empty until the terminal signal)
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.tool_calls
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish_reason.as_ref()
    }

    /// Error that ended the stream, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

/// Run a complete fragment sequence through a fresh assembler
pub fn assemble(parts: impl IntoIterator<Item = StreamPart>) -> (StreamAssembler, Vec<AssemblerEvent>) {
    let mut assembler = StreamAssembler::new();
    let mut events = Vec::new();
    for part in parts {
        events.extend(assembler.push(part));
    }
    events.extend(assembler.end_of_stream());
    (assembler, events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn usage(prompt: usize, completion: usize) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn test_text_only_stream() {
        let (assembler, events) = assemble(vec![
            StreamPart::text("Hello"),
            StreamPart::text(", world"),
            StreamPart::finish(FinishReason::Stop),
            StreamPart::Usage {
                usage: usage(10, 2),
            },
        ]);

        assert_eq!(
            events,
            vec![
                AssemblerEvent::ContentDelta("Hello".into()),
                AssemblerEvent::ContentDelta(", world".into()),
                AssemblerEvent::TokenCount(usage(10, 2)),
                AssemblerEvent::Done,
            ]
        );
        assert_eq!(assembler.text(), "Hello, world");
        assert!(assembler.tool_calls().is_empty());
        assert!(assembler.error().is_none());
    }

    #[test]
    fn test_tool_calls_emitted_on_finish() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.push(StreamPart::tool_start(0, "call_a", "bash")).is_empty());
        assert!(assembler.push(StreamPart::arguments(0, r#"{"comm"#)).is_empty());
        assert!(assembler.push(StreamPart::arguments(0, r#"and":"ls"}"#)).is_empty());

        let events = assembler.push(StreamPart::finish(FinishReason::ToolCalls));
        let AssemblerEvent::ToolCalls(calls) = &events[0] else {
            panic!("expected tool calls, got {:?}", events);
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "bash");
        assert_eq!(calls[0].arguments, json!({"command": "ls"}));

        assert_eq!(assembler.end_of_stream(), vec![AssemblerEvent::Done]);
    }

    /// All interleavings of `a` and `b`, preserving each sequence's own order
    fn interleavings(a: &[StreamPart], b: &[StreamPart]) -> Vec<Vec<StreamPart>> {
        if a.is_empty() {
            return vec![b.to_vec()];
        }
        if b.is_empty() {
            return vec![a.to_vec()];
        }
        let mut out = Vec::new();
        for mut rest in interleavings(&a[1..], b) {
            rest.insert(0, a[0].clone());
            out.push(rest);
        }
        for mut rest in interleavings(a, &b[1..]) {
            rest.insert(0, b[0].clone());
            out.push(rest);
        }
        out
    }

    #[test]
    fn test_interleaved_indices_reassemble_independently() {
        let first = vec![
            StreamPart::tool_start(0, "call_0", "view_file"),
            StreamPart::arguments(0, r#"{"path":"#),
            StreamPart::arguments(0, r#""src/main.rs"}"#),
        ];
        let second = vec![
            StreamPart::tool_start(1, "call_1", "bash"),
            StreamPart::arguments(1, r#"{"command":"#),
            StreamPart::text("checking"),
            StreamPart::arguments(1, r#""pwd"}"#),
        ];

        let orders = interleavings(&first, &second);
        assert_eq!(orders.len(), 35);

        for order in orders {
            let mut parts = order;
            parts.push(StreamPart::finish(FinishReason::ToolCalls));
            let (assembler, events) = assemble(parts);

            let calls = assembler.tool_calls();
            assert_eq!(calls.len(), 2);
            assert_eq!(calls[0].id, "call_0");
            assert_eq!(calls[0].raw_arguments, r#"{"path":"src/main.rs"}"#);
            assert_eq!(calls[1].id, "call_1");
            assert_eq!(calls[1].raw_arguments, r#"{"command":"pwd"}"#);
            assert_eq!(assembler.text(), "checking");
            assert_eq!(events.last(), Some(&AssemblerEvent::Done));
        }
    }

    #[test]
    fn test_calls_are_ordered_by_index_not_arrival() {
        let (assembler, _) = assemble(vec![
            StreamPart::tool_start(2, "late", "bash"),
            StreamPart::tool_start(0, "early", "bash"),
            StreamPart::arguments(2, "{}"),
            StreamPart::arguments(0, "{}"),
            StreamPart::finish(FinishReason::ToolCalls),
        ]);
        let ids: Vec<_> = assembler.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_unparseable_arguments_reported_per_call() {
        let (assembler, events) = assemble(vec![
            StreamPart::tool_start(0, "ok", "bash"),
            StreamPart::arguments(0, r#"{"command":"ls"}"#),
            StreamPart::tool_start(1, "broken", "create_file"),
            StreamPart::arguments(1, r#"{"path": "a.txt", "content": "unterminated"#),
            StreamPart::finish(FinishReason::Length),
        ]);

        let calls = assembler.tool_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].argument_error.is_none());
        assert!(calls[1].argument_error.is_some());
        assert!(matches!(events[0], AssemblerEvent::ToolCalls(ref c) if c.len() == 2));
    }

    #[test]
    fn test_missing_id_is_synthesized() {
        let (assembler, _) = assemble(vec![
            StreamPart::ToolCallDelta {
                index: 3,
                id: None,
                name: Some("bash".into()),
                arguments: Some("{}".into()),
            },
            StreamPart::finish(FinishReason::ToolCalls),
        ]);
        assert_eq!(assembler.tool_calls()[0].id, "call_3");
    }

    #[test]
    fn test_early_close_reports_error_and_done() {
        let (assembler, events) = assemble(vec![
            StreamPart::text("partial"),
            StreamPart::tool_start(0, "c", "bash"),
            StreamPart::arguments(0, r#"{"comma"#),
        ]);

        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], AssemblerEvent::Error(_)));
        assert_eq!(events[2], AssemblerEvent::Done);
        assert!(assembler.tool_calls().is_empty());
        assert!(assembler.is_done());
    }

    #[test]
    fn test_error_part_is_terminal() {
        let mut assembler = StreamAssembler::new();
        let events = assembler.push(StreamPart::Error {
            error: "rate limited".into(),
        });
        assert_eq!(
            events,
            vec![
                AssemblerEvent::Error("rate limited".into()),
                AssemblerEvent::Done
            ]
        );
        assert!(assembler.push(StreamPart::text("late")).is_empty());
        assert!(assembler.end_of_stream().is_empty());
    }
}
