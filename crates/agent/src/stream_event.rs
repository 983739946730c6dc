//! Turn-level streaming events.
//!
//! `AgentStreamEvent` wraps provider-level stream chunks and tool activity
//! into events the gateway and CLI consume. Only `Chunk` text is part of the
//! answer the resident hears; the rest is for logs and richer clients.

use serde::{Deserialize, Serialize};
use tides_core::provider::Usage;

/// Events emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial answer text.
    Chunk { content: String },

    /// The model asked for a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A tool invocation was resolved.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The turn finished.
    Done {
        steps: usize,
        tool_calls_made: usize,
        budget_exhausted: bool,
        usage: Option<Usage>,
    },

    /// The model failed; no further events follow.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
