//! Orchestrator state

use serde::Serialize;

/// Where the orchestrator is within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    /// Waiting on the model API
    Requesting,
    /// Consuming a streamed response
    Streaming,
    /// Executing tool calls
    ToolRound,
    Done,
    Aborted,
    Error,
}

impl AgentState {
    /// True while a turn is in progress
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AgentState::Requesting | AgentState::Streaming | AgentState::ToolRound
        )
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentState::Idle => "idle",
            AgentState::Requesting => "requesting",
            AgentState::Streaming => "streaming",
            AgentState::ToolRound => "tool_round",
            AgentState::Done => "done",
            AgentState::Aborted => "aborted",
            AgentState::Error => "error",
        };
        write!(f, "{}", name)
    }
}
