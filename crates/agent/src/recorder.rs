//! Fire-and-forget persistence of finished exchanges.

use chrono::Utc;
use std::sync::Arc;
use tides_core::error::StoreError;
use tides_core::event::{DomainEvent, EventBus};
use tides_core::message::{Message, Role, SessionId};
use tides_core::store::{ConciergeStore, NewExchange};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Appends exchanges to the store, off the response path.
pub struct ExchangeRecorder {
    store: Arc<dyn ConciergeStore>,
    event_bus: Option<Arc<EventBus>>,
}

impl ExchangeRecorder {
    pub fn new(store: Arc<dyn ConciergeStore>) -> Self {
        Self {
            store,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Persist one exchange. Failures are logged and published, then returned.
    pub async fn record(&self, exchange: NewExchange) -> Result<(), StoreError> {
        let session_id = exchange.session_id.to_string();
        let message_count = exchange.messages.len();

        match self.store.append_exchange(exchange).await {
            Ok(()) => {
                debug!(session = %session_id, message_count, "Exchange recorded");
                self.publish(DomainEvent::ExchangeRecorded {
                    session_id,
                    message_count,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                error!(
                    session = %session_id,
                    store = self.store.name(),
                    error = %e,
                    "Failed to record exchange"
                );
                self.publish(DomainEvent::PersistenceFailed {
                    session_id,
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Record on a detached task. The outcome is only observable through
    /// logs and the event bus.
    pub fn spawn_record(self: &Arc<Self>, exchange: NewExchange) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            let _ = recorder.record(exchange).await;
        })
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Build the record for a turn: the new user messages followed by the
/// assistant's final answer.
///
/// Clients may resend the whole visible conversation. Only the messages after
/// the last assistant reply are new; earlier ones were recorded by the turns
/// that produced them.
pub fn exchange_for(
    session_id: SessionId,
    unit_number: Option<String>,
    inbound: &[Message],
    final_text: &str,
) -> NewExchange {
    let new_turn = inbound
        .iter()
        .rposition(|m| m.role == Role::Assistant)
        .map_or(inbound, |last| &inbound[last + 1..]);
    let mut messages: Vec<Message> = new_turn
        .iter()
        .filter(|m| m.role == Role::User && m.has_content())
        .cloned()
        .collect();
    messages.push(Message::assistant(final_text));

    NewExchange {
        session_id,
        unit_number,
        messages,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tides_store::InMemoryStore;

    fn sample() -> NewExchange {
        exchange_for(
            SessionId("s-1".into()),
            Some("101".into()),
            &[Message::assistant("Earlier reply"), Message::user("Any packages?")],
            "You have one package from FedEx.",
        )
    }

    #[test]
    fn exchange_keeps_user_messages_and_final_answer() {
        let exchange = sample();
        assert_eq!(exchange.messages.len(), 2);
        assert_eq!(exchange.messages[0].role, Role::User);
        assert_eq!(exchange.messages[1].text(), "You have one package from FedEx.");
        assert_eq!(exchange.unit_number.as_deref(), Some("101"));
    }

    #[test]
    fn resent_conversation_records_only_the_new_turn() {
        let exchange = exchange_for(
            SessionId("s-1".into()),
            Some("101".into()),
            &[
                Message::user("Do I have packages?"),
                Message::assistant("You have two packages."),
                Message::user("Mark them picked up"),
            ],
            "Done, logged.",
        );

        let recorded: Vec<(Role, String)> = exchange
            .messages
            .iter()
            .map(|m| (m.role, m.text()))
            .collect();
        assert_eq!(
            recorded,
            vec![
                (Role::User, "Mark them picked up".to_string()),
                (Role::Assistant, "Done, logged.".to_string()),
            ]
        );
    }

    #[test]
    fn recorded_roles_alternate_for_multi_turn_input() {
        let exchange = exchange_for(
            SessionId("s-1".into()),
            None,
            &[
                Message::user("Hi"),
                Message::assistant("Hello!"),
                Message::user("Book the gym"),
                Message::user("for tomorrow at 7"),
            ],
            "Booked.",
        );

        let roles: Vec<Role> = exchange.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
        assert_eq!(exchange.messages[0].text(), "Book the gym");
    }

    #[tokio::test]
    async fn spawned_record_lands_in_store() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let recorder = Arc::new(ExchangeRecorder::new(store.clone()).with_event_bus(bus));

        recorder.spawn_record(sample()).await.unwrap();

        assert_eq!(store.exchanges().await.len(), 1);
        let event = events.recv().await.unwrap();
        assert!(matches!(&*event, DomainEvent::ExchangeRecorded { message_count: 2, .. }));
    }

    #[tokio::test]
    async fn failed_write_is_published() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fail_exchange_writes(true);
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let recorder = ExchangeRecorder::new(store).with_event_bus(bus);

        assert!(recorder.record(sample()).await.is_err());
        let event = events.recv().await.unwrap();
        assert!(matches!(&*event, DomainEvent::PersistenceFailed { .. }));
    }
}
