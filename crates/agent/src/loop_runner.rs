//! The concierge orchestration loop.
//!
//! Each step submits the conversation to the model and streams its text to
//! the caller. Tool invocations are resolved in emission order and appended
//! as tool turns before the next submission. The loop ends on a step with
//! no tool calls, when the step budget is spent, or when the caller leaves.

use crate::emitter::StreamEmitter;
use crate::stream_event::AgentStreamEvent;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tides_core::error::{ProviderError, ToolError};
use tides_core::event::{DomainEvent, EventBus};
use tides_core::message::Message;
use tides_core::provider::{Provider, ProviderRequest, Usage};
use tides_core::tool::{ToolCall, ToolRegistry, ToolResult};
use tracing::{debug, error, warn};

/// Result text handed to the model when a tool faults.
pub const TOOL_FAULT_MESSAGE: &str = "System Error: An unexpected error occurred.";

/// Where the loop is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools,
    Done,
}

/// What a finished turn produced.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// The answer to record for this turn.
    pub final_text: String,
    /// Model submissions made.
    pub steps: usize,
    pub tool_calls_made: usize,
    pub budget_exhausted: bool,
    /// The caller dropped the stream before the turn finished.
    pub caller_gone: bool,
    pub usage: Usage,
}

#[derive(Default)]
struct StepOutput {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

/// The model/tool loop for one turn.
pub struct ConciergeLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Max tokens per model response
    max_tokens: Option<u32>,

    /// Tool registry, shared across requests
    tools: Arc<ToolRegistry>,

    /// Maximum model submissions per turn
    max_steps: usize,

    /// Resolve one step's tool calls concurrently
    parallel_tools: bool,

    event_bus: Option<Arc<EventBus>>,
}

impl ConciergeLoop {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            max_steps: 5,
            parallel_tools: false,
            event_bus: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the step budget. At least one step is always allowed.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max.max(1);
        self
    }

    pub fn with_parallel_tools(mut self, enabled: bool) -> Self {
        self.parallel_tools = enabled;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run a turn, streaming through `emitter`.
    ///
    /// Returns `Err` only when the model fails; the caller decides how to
    /// report it. Tool failures never end the turn.
    pub async fn run(
        &self,
        system: &str,
        messages: Vec<Message>,
        emitter: &mut StreamEmitter,
    ) -> Result<TurnOutcome, ProviderError> {
        let tool_defs = self.tools.definitions();
        let mut conversation = messages;
        let mut outcome = TurnOutcome::default();
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut answer: Option<String> = None;
        let mut state = LoopState::AwaitingModel;

        while state != LoopState::Done {
            state = match state {
                LoopState::AwaitingModel => {
                    if outcome.steps >= self.max_steps {
                        warn!(max_steps = self.max_steps, "Step budget exhausted");
                        outcome.budget_exhausted = true;
                        LoopState::Done
                    } else {
                        outcome.steps += 1;
                        emitter.begin_step();
                        debug!(
                            step = outcome.steps,
                            messages = conversation.len(),
                            "Submitting to model"
                        );

                        let request = ProviderRequest {
                            model: self.model.clone(),
                            system: system.to_string(),
                            messages: conversation.clone(),
                            temperature: self.temperature,
                            max_tokens: self.max_tokens,
                            tools: tool_defs.clone(),
                            stream: true,
                        };
                        let step = self.stream_step(request, emitter).await?;
                        if let Some(usage) = &step.usage {
                            outcome.usage.add(usage);
                        }

                        if emitter.caller_gone() {
                            LoopState::Done
                        } else if step.tool_calls.is_empty() {
                            answer = Some(step.text);
                            LoopState::Done
                        } else {
                            debug!(
                                step = outcome.steps,
                                tool_calls = step.tool_calls.len(),
                                "Model requested tools"
                            );
                            let turn = Message::assistant_with_calls(&step.text, &step.tool_calls);
                            conversation.push(turn);
                            pending = step.tool_calls;
                            LoopState::ExecutingTools
                        }
                    }
                }
                LoopState::ExecutingTools => {
                    let calls = std::mem::take(&mut pending);
                    for (call, result) in self.resolve_step(&calls, emitter).await {
                        outcome.tool_calls_made += 1;
                        conversation.push(Message::tool_result(
                            call.id.clone(),
                            call.name.clone(),
                            result.output,
                            !result.success,
                        ));
                    }

                    if emitter.caller_gone() {
                        LoopState::Done
                    } else {
                        LoopState::AwaitingModel
                    }
                }
                LoopState::Done => LoopState::Done,
            };
        }

        if emitter.caller_gone() {
            outcome.caller_gone = true;
            return Ok(outcome);
        }

        outcome.final_text = match answer {
            Some(text) if !text.trim().is_empty() => text,
            Some(_) => self.fallback(emitter).await,
            None => {
                let partial = emitter.streamed_text().trim().to_string();
                if partial.is_empty() {
                    self.fallback(emitter).await
                } else {
                    partial
                }
            }
        };
        emitter
            .event(AgentStreamEvent::Done {
                steps: outcome.steps,
                tool_calls_made: outcome.tool_calls_made,
                budget_exhausted: outcome.budget_exhausted,
                usage: Some(outcome.usage.clone()),
            })
            .await;
        outcome.caller_gone = emitter.caller_gone();

        Ok(outcome)
    }

    /// Stream the localized fallback answer and return it.
    async fn fallback(&self, emitter: &mut StreamEmitter) -> String {
        let text = emitter.locale().fallback_answer().to_string();
        emitter.begin_step();
        emitter.text(&text).await;
        text
    }

    /// Read one model response, forwarding text as it arrives.
    ///
    /// Stops reading as soon as the caller is gone.
    async fn stream_step(
        &self,
        request: ProviderRequest,
        emitter: &mut StreamEmitter,
    ) -> Result<StepOutput, ProviderError> {
        let mut stream_rx = self.provider.stream(request).await?;
        let mut step = StepOutput::default();

        while let Some(chunk) = stream_rx.recv().await {
            let chunk = chunk?;

            if let Some(delta) = chunk.content.as_deref()
                && !delta.is_empty()
            {
                step.text.push_str(delta);
                if !emitter.text(delta).await {
                    break;
                }
            }

            step.tool_calls.extend(chunk.tool_calls);
            if chunk.usage.is_some() {
                step.usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        Ok(step)
    }

    /// Resolve every call of one step. Results keep emission order.
    async fn resolve_step(
        &self,
        calls: &[ToolCall],
        emitter: &mut StreamEmitter,
    ) -> Vec<(ToolCall, ToolResult)> {
        if self.parallel_tools {
            for call in calls {
                if !emitter.event(tool_call_event(call)).await {
                    return Vec::new();
                }
            }
            let results =
                futures::future::join_all(calls.iter().map(|call| self.resolve_call(call))).await;
            let resolved: Vec<(ToolCall, ToolResult)> =
                calls.iter().cloned().zip(results).collect();
            for (call, result) in &resolved {
                emitter.event(tool_result_event(call, result)).await;
            }
            return resolved;
        }

        let mut resolved = Vec::with_capacity(calls.len());
        for call in calls {
            if !emitter.event(tool_call_event(call)).await {
                break;
            }
            let result = self.resolve_call(call).await;
            emitter.event(tool_result_event(call, &result)).await;
            resolved.push((call.clone(), result));
        }
        resolved
    }

    /// Execute one call, turning every failure into a result for the model.
    async fn resolve_call(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let attempt = AssertUnwindSafe(self.tools.execute(call))
            .catch_unwind()
            .await;

        let mut result = match attempt {
            Ok(Ok(result)) => result,
            Ok(Err(ToolError::NotFound(name))) => {
                error!(tool = %name, "Model requested an unknown tool");
                ToolResult::failed(format!("Unknown tool: {name}"))
            }
            Ok(Err(e @ ToolError::InvalidArguments { .. })) => {
                warn!(tool = %call.name, error = %e, "Rejected tool arguments");
                ToolResult::failed(e.to_string())
            }
            Ok(Err(e @ ToolError::ExecutionFailed { .. })) => {
                error!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::failed(TOOL_FAULT_MESSAGE)
            }
            Err(_) => {
                error!(tool = %call.name, "Tool panicked");
                ToolResult::failed(TOOL_FAULT_MESSAGE)
            }
        };
        result.call_id = call.id.clone();

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            tool = %call.name,
            success = result.success,
            duration_ms,
            "Tool resolved"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success: result.success,
                duration_ms,
                timestamp: Utc::now(),
            });
        }
        result
    }
}

fn tool_call_event(call: &ToolCall) -> AgentStreamEvent {
    AgentStreamEvent::ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.arguments.clone(),
    }
}

fn tool_result_event(call: &ToolCall, result: &ToolResult) -> AgentStreamEvent {
    AgentStreamEvent::ToolResult {
        id: call.id.clone(),
        name: call.name.clone(),
        output: result.output.clone(),
        success: result.success,
    }
}
