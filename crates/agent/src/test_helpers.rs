//! Scripted providers for tests.
//!
//! Enabled for this crate's own tests and, through the `test-helpers`
//! feature, for the gateway and CLI test suites.

use std::sync::Mutex;
use tides_core::error::ProviderError;
use tides_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use tides_core::tool::ToolCall;

/// One scripted model step.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Stream this response's text in word-sized chunks, then its tool calls.
    Respond(ProviderResponse),
    /// Fail before any chunk is produced.
    Fail(ProviderError),
    /// Stream `text`, then fail.
    FailMidStream { text: String, error: ProviderError },
}

/// A mock provider that returns a sequence of scripted steps.
///
/// Each call to `complete` or `stream` consumes the next step and captures
/// the request. Panics if more calls are made than steps provided.
pub struct SequentialMockProvider {
    steps: Mutex<Vec<ScriptedStep>>,
    requests: Mutex<Vec<ProviderRequest>>,
    call_count: Mutex<usize>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(ScriptedStep::Respond).collect())
    }

    pub fn scripted(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Mutex::new(steps),
            requests: Mutex::new(Vec::new()),
            call_count: Mutex::new(0),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// Create a provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<ToolCall>, thought: &str, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_calls, thought),
            make_text_response(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, request: ProviderRequest) -> ScriptedStep {
        let mut count = self.call_count.lock().unwrap();
        let steps = self.steps.lock().unwrap();

        if *count >= steps.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                steps.len()
            );
        }

        let step = steps[*count].clone();
        *count += 1;
        self.requests.lock().unwrap().push(request);
        step
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (text, tool_calls, usage, error) = match self.next_step(request) {
            ScriptedStep::Respond(response) => {
                (response.text, response.tool_calls, response.usage, None)
            }
            ScriptedStep::Fail(error) => return Err(error),
            ScriptedStep::FailMidStream { text, error } => (text, Vec::new(), None, Some(error)),
        };

        let pieces: Vec<&str> = text.split_inclusive(' ').collect();
        let (tx, rx) = tokio::sync::mpsc::channel(pieces.len() + 2);
        for piece in pieces {
            let _ = tx.try_send(Ok(StreamChunk {
                content: Some(piece.to_string()),
                ..Default::default()
            }));
        }
        let last = match error {
            Some(error) => Err(error),
            None => Ok(StreamChunk {
                content: None,
                tool_calls,
                done: true,
                usage,
            }),
        };
        let _ = tx.try_send(last);
        Ok(rx)
    }
}

fn mock_usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        text: text.to_string(),
        tool_calls: Vec::new(),
        usage: mock_usage(),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<ToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        text: thought.to_string(),
        tool_calls,
        usage: mock_usage(),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args,
    }
}
