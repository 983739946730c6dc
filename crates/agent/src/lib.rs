//! The concierge turn loop for Tides.
//!
//! A turn follows an **Assemble → Ask → Act → Answer** cycle:
//!
//! 1. **Assemble** recorded history for the session with the new messages
//! 2. **Ask** the model, streaming its text straight to the caller
//! 3. **Act**: resolve tool calls in emission order, append results, loop back to 2
//! 4. **Answer**: once the model replies without tool calls, close the stream
//!    and record the exchange in the background
//!
//! The loop also ends when the step budget is spent or the caller hangs up.

pub mod concierge;
pub mod context;
pub mod emitter;
pub mod loop_runner;
pub mod prompt;
pub mod recorder;
pub mod stream_event;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use concierge::{ChatRequest, Concierge};
pub use context::{AssembledContext, ContextAssembler};
pub use emitter::{StreamEmitter, TextStream, open_text_stream};
pub use loop_runner::{ConciergeLoop, LoopState, TurnOutcome};
pub use prompt::system_prompt;
pub use recorder::ExchangeRecorder;
pub use stream_event::AgentStreamEvent;
