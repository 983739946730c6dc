//! History-aware context assembly.
//!
//! The assembler never fails a turn. When the store cannot be read the turn
//! proceeds with only the caller's messages and the degradation is logged
//! and published on the event bus.
//!
//! # Ordering
//!
//! History is placed before the new messages, oldest exchange first. The
//! store already returns exchanges oldest first; the assembler re-sorts by
//! timestamp with a stable sort so equal timestamps keep the store's order.

use chrono::Utc;
use std::sync::Arc;
use tides_core::event::{DomainEvent, EventBus};
use tides_core::message::{Message, SessionId};
use tides_core::store::ConciergeStore;
use tracing::{debug, warn};

/// Output of one assembly.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// History followed by the caller's messages.
    pub messages: Vec<Message>,
    /// How many of `messages` came from recorded history.
    pub history_messages: usize,
    /// Whether history was requested but could not be loaded.
    pub degraded: bool,
}

/// Builds the model-facing message list for a turn.
pub struct ContextAssembler {
    store: Option<Arc<dyn ConciergeStore>>,
    history_limit: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl ContextAssembler {
    pub fn new(store: Option<Arc<dyn ConciergeStore>>, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Assemble the context for a turn.
    ///
    /// Without a session or a store the result is just the caller's messages.
    /// Messages with nothing model-consumable are dropped from both sources.
    pub async fn assemble(
        &self,
        session: Option<&SessionId>,
        new_messages: Vec<Message>,
    ) -> AssembledContext {
        let new_messages: Vec<Message> =
            new_messages.into_iter().filter(Message::has_content).collect();

        let (Some(session), Some(store)) = (session, self.store.as_ref()) else {
            return AssembledContext {
                messages: new_messages,
                history_messages: 0,
                degraded: false,
            };
        };

        match store
            .fetch_recent_exchanges(session, self.history_limit)
            .await
        {
            Ok(mut exchanges) => {
                exchanges.sort_by_key(|e| e.created_at);
                let history: Vec<Message> = exchanges
                    .into_iter()
                    .flat_map(|e| e.messages)
                    .filter(Message::has_content)
                    .collect();
                let history_messages = history.len();
                debug!(
                    session = %session,
                    history_messages,
                    "Loaded conversation history"
                );

                let mut messages = history;
                messages.extend(new_messages);
                AssembledContext {
                    messages,
                    history_messages,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    session = %session,
                    store = store.name(),
                    error = %e,
                    "History unavailable, continuing without it"
                );
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::ContextDegraded {
                        session_id: session.to_string(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                AssembledContext {
                    messages: new_messages,
                    history_messages: 0,
                    degraded: true,
                }
            }
        }
    }
}
