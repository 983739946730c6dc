//! Provider trait: the abstraction over the language model.
//!
//! A Provider knows how to send system instructions, a conversation and a set
//! of tool declarations to a model and get a response back, either complete or
//! as a stream of chunks.

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One model submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// System instructions, sent ahead of the conversation
    pub system: String,

    /// The conversation turns, oldest first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool declaration sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Text the model produced (may be empty when it only calls tools)
    pub text: String,

    /// Tool invocations, in emission order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A single chunk in a streaming response.
///
/// Text arrives as deltas; tool calls arrive fully assembled, in emission
/// order, on the chunk marked `done`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The orchestration loop calls `stream()` without knowing which backend is
/// behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a stream of response chunks.
    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError>;

    /// Send a request and wait for the whole response.
    ///
    /// Drains `stream()`: text deltas are concatenated and tool calls taken
    /// from the `done` chunk.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let mut rx = self.stream(request).await?;
        let mut response = ProviderResponse {
            text: String::new(),
            tool_calls: Vec::new(),
            usage: None,
            model,
        };
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content {
                response.text.push_str(&content);
            }
            if chunk.done {
                response.tool_calls = chunk.tool_calls;
                response.usage = chunk.usage;
                break;
            }
        }
        Ok(response)
    }
}
