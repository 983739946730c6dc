//! Conversation context assembly.
//!
//! Merges recorded history for a session with the caller's new messages
//! into the ordered list the model sees on its first step.

pub mod assembler;

pub use assembler::{AssembledContext, ContextAssembler};
