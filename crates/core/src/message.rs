//! Message and session domain types.
//!
//! These are the value objects that flow through the whole system:
//! the caller sends display messages → the assembler merges them with history →
//! the loop appends assistant and tool turns → the recorder persists the exchange.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a caller-owned conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Build from caller input. Blank strings mean "no session".
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The resident talking to the concierge
    User,
    /// The model
    Assistant,
    /// Result of a tool invocation
    Tool,
}

/// One ordered piece of a turn's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },

    /// A tool invocation requested by the model.
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },

    /// The resolved result of a tool invocation.
    ToolResult {
        call_id: String,
        name: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Part types produced by front-ends that the model never sees
    /// (step markers, reasoning traces, file previews).
    #[serde(other)]
    Unsupported,
}

/// A single immutable turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,

    pub role: Role,

    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts,
        }
    }

    /// Create a user turn with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::Text { text: text.into() }])
    }

    /// Create an assistant turn with a single text part.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![MessagePart::Text { text: text.into() }])
    }

    /// Create an assistant turn carrying optional leading text followed by
    /// tool invocations, in emission order.
    pub fn assistant_with_calls(text: &str, calls: &[crate::tool::ToolCall]) -> Self {
        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(MessagePart::Text {
                text: text.to_string(),
            });
        }
        parts.extend(calls.iter().map(|c| MessagePart::ToolCall {
            id: c.id.clone(),
            name: c.name.clone(),
            arguments: c.arguments.clone(),
        }));
        Self::new(Role::Assistant, parts)
    }

    /// Create a tool turn carrying one resolved invocation.
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(
            Role::Tool,
            vec![MessagePart::ToolResult {
                call_id: call_id.into(),
                name: name.into(),
                output: output.into(),
                is_error,
            }],
        )
    }

    /// Concatenated text parts, in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether this turn carries anything a model can consume.
    pub fn has_content(&self) -> bool {
        self.parts
            .iter()
            .any(|p| !matches!(p, MessagePart::Unsupported))
    }
}
