//! # Tides Core
//!
//! Domain types, traits, and error definitions for the Tides voice concierge.
//! This crate has **no framework dependencies**; it defines the domain model
//! that all other crates implement against.
//!
//! Every collaborator is a trait here (model provider, tool, store).
//! Implementations live in their respective crates, so tests can swap in
//! scripted providers and in-memory stores.

pub mod error;
pub mod event;
pub mod locale;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use locale::Locale;
pub use message::{Message, MessagePart, Role, SessionId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use store::{Amenity, ConciergeStore, Exchange, ItemStatus, NewExchange, NewReservation, PendingItem};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
