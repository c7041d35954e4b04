//! Conversation entries
//!
//! The orchestrator is the only writer. Callers read snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ai::types::ToolCallRequest;
use crate::tools::registry::ToolResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    Assistant,
    /// A tool call that is still executing
    ToolCall,
    ToolResult,
}

/// One entry in the visible conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub kind: EntryKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    /// Calls requested by an assistant entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// The call a tool_call/tool_result entry refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl ConversationEntry {
    fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            is_streaming: false,
            tool_calls: Vec::new(),
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(EntryKind::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Assistant, content)
    }

    /// Assistant entry that deltas are still being appended to
    pub fn streaming_assistant() -> Self {
        let mut entry = Self::new(EntryKind::Assistant, "");
        entry.is_streaming = true;
        entry
    }

    pub fn tool_call(call: &ToolCallRequest) -> Self {
        let mut entry = Self::new(EntryKind::ToolCall, "Executing...");
        entry.tool_call = Some(call.clone());
        entry
    }

    pub fn tool_result(call: &ToolCallRequest, result: ToolResult) -> Self {
        let mut entry = Self::new(EntryKind::ToolCall, "");
        entry.tool_call = Some(call.clone());
        entry.complete_tool(result);
        entry
    }

    /// Turn a pending tool_call entry into its tool_result
    pub fn complete_tool(&mut self, result: ToolResult) {
        self.kind = EntryKind::ToolResult;
        self.content = result.model_content();
        self.tool_result = Some(result);
    }
}

/// Append-only log of entries, shared with readers
///
/// Only the most recent entry can be changed after it is pushed.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    entries: Arc<parking_lot::RwLock<Vec<ConversationEntry>>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: ConversationEntry) {
        self.entries.write().push(entry);
    }

    /// Mutate the most recent entry. Returns false when the log is empty.
    pub fn update_last(&self, f: impl FnOnce(&mut ConversationEntry)) -> bool {
        match self.entries.write().last_mut() {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    pub fn last(&self) -> Option<ConversationEntry> {
        self.entries.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.entries.read().clone()
    }

    /// Entries from `index` on
    pub fn since(&self, index: usize) -> Vec<ConversationEntry> {
        self.entries
            .read()
            .get(index..)
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
