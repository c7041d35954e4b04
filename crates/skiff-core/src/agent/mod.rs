//! Agent system for skiff
//!
//! ## Orchestrator (the canonical agentic loop)
//! - `Agent` - Rounds of model requests and tool execution
//! - `AgentEvent` / `TurnOutcome` - Event protocol between the agent and its callers
//! - `AgentConfig` - Model, round limit, timeouts
//!
//! ## Core Components
//! - `ToolDispatcher` - Resolves, confirms and runs tool calls
//! - `ConfirmationGate` - One human decision at a time, plus session flags
//! - `ConversationLog` - Entries visible to the caller
//! - `AgentState` - Where a turn is
//! - `AgentCancellation` - Per-turn cancellation

pub mod cancellation;
pub mod confirmation;
pub mod conversation;
pub mod dispatcher;
pub mod loop_events;
pub mod orchestrator;
pub mod state;
pub mod stream;

pub use cancellation::{AgentCancellation, TurnToken};
pub use confirmation::{
    ConfirmationCategory, ConfirmationGate, ConfirmationPrompt, Decision, PendingConfirmation,
    SessionFlags,
};
pub use conversation::{ConversationEntry, ConversationLog, EntryKind};
pub use dispatcher::{ToolDispatcher, CANCELLED_MESSAGE, DEFAULT_TOOL_TIMEOUT};
pub use loop_events::{AgentEvent, TurnOutcome};
pub use orchestrator::{Agent, AgentConfig, DEFAULT_MAX_ROUNDS, ROUND_LIMIT_MESSAGE};
pub use state::AgentState;
