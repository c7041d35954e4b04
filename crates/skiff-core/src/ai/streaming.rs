//! Stream fragment vocabulary
//!
//! Every provider parser lowers its wire chunks into `StreamPart`s. The
//! assembler only ever sees these.

use serde::{Deserialize, Serialize};

use super::types::{FinishReason, Usage};

/// One incremental fragment of a model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPart {
    /// Assistant text delta
    TextDelta { delta: String },

    /// Tool call fragment. `index` identifies the call within the response;
    /// `id` and `name` usually only arrive on the first fragment.
    ToolCallDelta {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },

    /// Usage metadata
    Usage { usage: Usage },

    /// Terminal signal
    Finish { reason: FinishReason },

    /// Provider or transport error (terminal)
    Error { error: String },
}

impl StreamPart {
    pub fn text(delta: impl Into<String>) -> Self {
        StreamPart::TextDelta {
            delta: delta.into(),
        }
    }

    /// Argument-only fragment for an already started call
    pub fn arguments(index: usize, fragment: impl Into<String>) -> Self {
        StreamPart::ToolCallDelta {
            index,
            id: None,
            name: None,
            arguments: Some(fragment.into()),
        }
    }

    /// First fragment of a call, carrying its id and name
    pub fn tool_start(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        StreamPart::ToolCallDelta {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        StreamPart::Finish { reason }
    }
}
