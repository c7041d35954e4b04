//! Canonical event protocol for the agentic loop.
//!
//! `AgentEvent` is the single source of truth for everything the orchestrator
//! emits during a streamed turn. Front ends (the CLI, or anything embedding
//! the library) map these to their own presentation.

use serde::Serialize;

use crate::ai::types::{ToolCallRequest, Usage};
use crate::tools::registry::ToolResult;

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    // ── Streaming ──────────────────────────────────────────────────────
    /// Text content delta from the model.
    ContentDelta { content: String },

    /// Token usage for one model call.
    TokenCount { usage: Usage },

    // ── Tool lifecycle ─────────────────────────────────────────────────
    /// Complete tool calls requested by the model.
    ToolCalls { tool_calls: Vec<ToolCallRequest> },

    /// One tool finished (or was refused).
    ToolResult {
        tool_call: ToolCallRequest,
        result: ToolResult,
    },

    // ── Turn lifecycle ─────────────────────────────────────────────────
    /// The turn is over. Always the last event.
    Done { outcome: TurnOutcome },

    /// Error occurred.
    Error { error: String },
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model answered without requesting more tools
    Completed,
    /// Aborted from outside
    Aborted,
    /// Stopped after the configured number of tool rounds
    RoundLimit { rounds: usize },
    /// Model API error; the conversation is still usable
    Failed { error: String },
}
