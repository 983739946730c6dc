//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens during a turn.
//! Other components (logging sinks, tests) can subscribe without coupling to
//! the orchestration code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A chat turn started
    TurnStarted {
        session_id: Option<String>,
        history_messages: usize,
        timestamp: DateTime<Utc>,
    },

    /// History could not be loaded; the turn continues without it
    ContextDegraded {
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation was resolved
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The loop reached a final answer
    TurnCompleted {
        session_id: Option<String>,
        steps: usize,
        budget_exhausted: bool,
        timestamp: DateTime<Utc>,
    },

    /// The model failed and the turn was abandoned
    ModelFailed {
        session_id: Option<String>,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// An exchange was persisted
    ExchangeRecorded {
        session_id: String,
        message_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Persisting an exchange failed
    PersistenceFailed {
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "check_packages".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "check_packages");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::PersistenceFailed {
            session_id: "s-1".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
