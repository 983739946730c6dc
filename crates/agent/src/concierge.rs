//! Turn entry point: assemble context, run the loop, record the exchange.

use crate::context::ContextAssembler;
use crate::emitter::StreamEmitter;
use crate::loop_runner::ConciergeLoop;
use crate::prompt::system_prompt;
use crate::recorder::{ExchangeRecorder, exchange_for};
use crate::stream_event::AgentStreamEvent;
use chrono::Utc;
use std::sync::Arc;
use tides_config::AppConfig;
use tides_core::error::Error;
use tides_core::event::{DomainEvent, EventBus};
use tides_core::locale::Locale;
use tides_core::message::{Message, SessionId};
use tides_core::provider::Provider;
use tides_core::store::ConciergeStore;
use tides_core::tool::ToolRegistry;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info};

/// One inbound chat turn.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub session_id: Option<SessionId>,
    pub unit_number: Option<String>,
    /// Falls back to the configured default locale.
    pub locale: Option<Locale>,
}

/// Runs chat turns. Cheap to share behind an `Arc`; every turn runs on its
/// own task.
pub struct Concierge {
    assembler: Arc<ContextAssembler>,
    agent: Arc<ConciergeLoop>,
    recorder: Option<Arc<ExchangeRecorder>>,
    default_locale: Locale,
    event_bus: Option<Arc<EventBus>>,
}

impl Concierge {
    pub fn new(agent: ConciergeLoop, assembler: ContextAssembler) -> Self {
        Self {
            assembler: Arc::new(assembler),
            agent: Arc::new(agent),
            recorder: None,
            default_locale: Locale::default(),
            event_bus: None,
        }
    }

    pub fn with_recorder(mut self, recorder: ExchangeRecorder) -> Self {
        self.recorder = Some(Arc::new(recorder));
        self
    }

    pub fn with_default_locale(mut self, locale: Locale) -> Self {
        self.default_locale = locale;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Wire a concierge from configuration and already-built collaborators.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn ConciergeStore>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let agent = ConciergeLoop::new(provider, config.default_model.clone(), tools)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_steps(config.agent.max_steps)
            .with_parallel_tools(config.agent.parallel_tools)
            .with_event_bus(event_bus.clone());
        let assembler = ContextAssembler::new(Some(store.clone()), config.agent.history_limit)
            .with_event_bus(event_bus.clone());
        let recorder = ExchangeRecorder::new(store).with_event_bus(event_bus.clone());

        Self::new(agent, assembler)
            .with_recorder(recorder)
            .with_default_locale(config.agent.default_locale)
            .with_event_bus(event_bus)
    }

    pub fn default_locale(&self) -> Locale {
        self.default_locale
    }

    /// Start a turn and return its event stream.
    ///
    /// The turn keeps running if the receiver is dropped, but stops talking
    /// to the model and is not recorded.
    pub fn start(&self, request: ChatRequest) -> Result<mpsc::Receiver<AgentStreamEvent>, Error> {
        if request.messages.is_empty() {
            return Err(Error::InvalidRequest("messages must not be empty".into()));
        }

        let locale = request.locale.unwrap_or(self.default_locale);
        let (mut emitter, rx) = StreamEmitter::channel(locale);
        let assembler = self.assembler.clone();
        let agent = self.agent.clone();
        let recorder = self.recorder.clone();
        let event_bus = self.event_bus.clone();
        let session = request.session_id;
        let unit = request.unit_number;
        let inbound = request.messages;

        let span = tracing::info_span!(
            "turn",
            session = session.as_ref().map(SessionId::as_str).unwrap_or("-"),
            unit = unit.as_deref().unwrap_or("-"),
            locale = %locale,
        );

        tokio::spawn(
            async move {
                let publish = |event: DomainEvent| {
                    if let Some(bus) = &event_bus {
                        bus.publish(event);
                    }
                };

                let context = assembler.assemble(session.as_ref(), inbound.clone()).await;
                info!(
                    history_messages = context.history_messages,
                    degraded = context.degraded,
                    "Turn started"
                );
                publish(DomainEvent::TurnStarted {
                    session_id: session.as_ref().map(ToString::to_string),
                    history_messages: context.history_messages,
                    timestamp: Utc::now(),
                });

                let system = system_prompt(locale, unit.as_deref());
                match agent.run(&system, context.messages, &mut emitter).await {
                    Ok(outcome) => {
                        drop(emitter);
                        if outcome.caller_gone {
                            info!(steps = outcome.steps, "Caller disconnected, exchange not recorded");
                        } else {
                            info!(
                                steps = outcome.steps,
                                tool_calls = outcome.tool_calls_made,
                                budget_exhausted = outcome.budget_exhausted,
                                "Turn completed"
                            );
                            if let (Some(recorder), Some(session)) = (&recorder, session.clone()) {
                                recorder.spawn_record(exchange_for(
                                    session,
                                    unit.clone(),
                                    &inbound,
                                    &outcome.final_text,
                                ));
                            }
                        }
                        publish(DomainEvent::TurnCompleted {
                            session_id: session.as_ref().map(ToString::to_string),
                            steps: outcome.steps,
                            budget_exhausted: outcome.budget_exhausted,
                            timestamp: Utc::now(),
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Model invocation failed");
                        publish(DomainEvent::ModelFailed {
                            session_id: session.as_ref().map(ToString::to_string),
                            error_message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        emitter.fail(&e).await;
                    }
                }
            }
            .instrument(span),
        );

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::open_text_stream;
    use crate::test_helpers::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tides_core::error::ProviderError;
    use tides_core::message::{MessagePart, Role};
    use tides_store::InMemoryStore;
    use tokio::sync::broadcast;

    struct Harness {
        store: Arc<InMemoryStore>,
        provider: Arc<SequentialMockProvider>,
        bus: Arc<EventBus>,
        concierge: Concierge,
    }

    fn harness(provider: SequentialMockProvider) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(provider);
        let bus = Arc::new(EventBus::default());
        let tools = Arc::new(tides_tools::default_registry(store.clone()));
        let concierge = Concierge::from_config(
            &AppConfig::default(),
            provider.clone(),
            store.clone(),
            tools,
            bus.clone(),
        );
        Harness {
            store,
            provider,
            bus,
            concierge,
        }
    }

    fn request(text: &str, session: Option<&str>) -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user(text)],
            session_id: session.map(|s| SessionId(s.into())),
            unit_number: Some("101".into()),
            locale: None,
        }
    }

    async fn answer(concierge: &Concierge, request: ChatRequest) -> String {
        let rx = concierge.start(request).unwrap();
        let stream = open_text_stream(rx).await.unwrap();
        stream.into_stream().collect::<Vec<_>>().await.concat()
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<Arc<DomainEvent>>,
        pred: impl Fn(&DomainEvent) -> bool,
    ) -> Arc<DomainEvent> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not published in time")
    }

    fn tool_outputs(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .flat_map(|m| m.parts.iter())
            .filter_map(|p| match p {
                MessagePart::ToolResult { output, .. } => Some(output.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn empty_messages_are_rejected() {
        let h = harness(SequentialMockProvider::single_text("unused"));
        let err = h.concierge.start(ChatRequest::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn package_question_reports_couriers() {
        let h = harness(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("check_packages", json!({"unitNumber": "101"}))],
            "Checking that for you...",
            "You have two packages, from CourierA and CourierB.",
        ));
        h.store.add_package("101", "CourierA").await.unwrap();
        h.store.add_package("101", "CourierB").await.unwrap();

        let text = answer(&h.concierge, request("Do I have any packages?", None)).await;

        assert_eq!(
            text,
            "Checking that for you... You have two packages, from CourierA and CourierB."
        );
        let second = &h.provider.requests()[1];
        assert_eq!(
            tool_outputs(&second.messages),
            vec!["Found 2 packages from CourierA and CourierB."]
        );
        assert!(second.system.contains("The resident is from Unit 101."));
    }

    #[tokio::test]
    async fn pickup_with_nothing_pending_is_a_noop_success() {
        let h = harness(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("log_pickup", json!({"unitNumber": "101"}))],
            "",
            "All set, your pickup is logged.",
        ));

        let text = answer(&h.concierge, request("Mark my packages as picked up", None)).await;

        assert_eq!(text, "All set, your pickup is logged.");
        assert_eq!(
            tool_outputs(&h.provider.requests()[1].messages),
            vec!["Successfully logged pickup."]
        );
        assert!(h.store.items_for("101").await.is_empty());
    }

    #[tokio::test]
    async fn unknown_amenity_never_reaches_the_store() {
        let h = harness(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call(
                "book_amenity",
                json!({"unitNumber": "101", "amenity": "spa", "time": "tomorrow at 5pm"}),
            )],
            "",
            "Sorry, the spa is not something I can book.",
        ));

        answer(&h.concierge, request("Book the spa tomorrow at 5pm", None)).await;

        let outputs = tool_outputs(&h.provider.requests()[1].messages);
        assert!(outputs[0].starts_with("Invalid arguments for book_amenity"));
        assert!(h.store.reservations().await.is_empty());
    }

    #[tokio::test]
    async fn history_is_recorded_and_replayed() {
        let h = harness(SequentialMockProvider::new(vec![
            make_text_response("Hello! How can I help?"),
            make_text_response("You asked about the gym."),
        ]));
        let mut events = h.bus.subscribe();

        answer(&h.concierge, request("Hi", Some("s-1"))).await;
        wait_for(&mut events, |e| matches!(e, DomainEvent::ExchangeRecorded { .. })).await;
        answer(&h.concierge, request("What did I ask?", Some("s-1"))).await;

        let second = &h.provider.requests()[1];
        let texts: Vec<String> = second.messages.iter().map(Message::text).collect();
        assert_eq!(texts, vec!["Hi", "Hello! How can I help?", "What did I ask?"]);

        let recorded = h.store.exchanges().await;
        assert_eq!(recorded[0].unit_number.as_deref(), Some("101"));
    }

    #[tokio::test]
    async fn resent_conversation_keeps_recorded_history_in_order() {
        let h = harness(SequentialMockProvider::new(vec![
            make_text_response("You have two packages."),
            make_text_response("Done, logged."),
            make_text_response("Anything else?"),
        ]));
        let mut events = h.bus.subscribe();

        answer(&h.concierge, request("Do I have packages?", Some("s-1"))).await;
        wait_for(&mut events, |e| matches!(e, DomainEvent::ExchangeRecorded { .. })).await;

        let mut follow_up = request("Mark them picked up", Some("s-1"));
        follow_up.messages = vec![
            Message::user("Do I have packages?"),
            Message::assistant("You have two packages."),
            Message::user("Mark them picked up"),
        ];
        answer(&h.concierge, follow_up).await;
        wait_for(&mut events, |e| matches!(e, DomainEvent::ExchangeRecorded { .. })).await;

        answer(&h.concierge, request("Thanks", Some("s-1"))).await;

        let third = &h.provider.requests()[2];
        let replayed: Vec<(Role, String)> = third
            .messages
            .iter()
            .map(|m| (m.role, m.text()))
            .collect();
        assert_eq!(
            replayed,
            vec![
                (Role::User, "Do I have packages?".to_string()),
                (Role::Assistant, "You have two packages.".to_string()),
                (Role::User, "Mark them picked up".to_string()),
                (Role::Assistant, "Done, logged.".to_string()),
                (Role::User, "Thanks".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_history_still_answers() {
        let h = harness(SequentialMockProvider::single_text("Happy to help."));
        h.store.set_fail_all(true);
        let mut events = h.bus.subscribe();

        let text = answer(&h.concierge, request("Hi", Some("s-1"))).await;

        assert_eq!(text, "Happy to help.");
        wait_for(&mut events, |e| matches!(e, DomainEvent::ContextDegraded { .. })).await;
    }

    #[tokio::test]
    async fn persistence_failure_does_not_change_the_answer() {
        let h = harness(SequentialMockProvider::single_text("Your gym is booked."));
        h.store.set_fail_exchange_writes(true);
        let mut events = h.bus.subscribe();

        let text = answer(&h.concierge, request("Book the gym", Some("s-1"))).await;

        assert_eq!(text, "Your gym is booked.");
        wait_for(&mut events, |e| matches!(e, DomainEvent::PersistenceFailed { .. })).await;
        assert!(h.store.exchanges().await.is_empty());
    }

    #[tokio::test]
    async fn early_model_failure_surfaces_as_error() {
        let h = harness(SequentialMockProvider::scripted(vec![ScriptedStep::Fail(
            ProviderError::ApiError {
                status_code: 500,
                message: "upstream exploded".into(),
            },
        )]));
        let mut events = h.bus.subscribe();

        let rx = h.concierge.start(request("Hi", Some("s-1"))).unwrap();
        assert!(open_text_stream(rx).await.is_err());

        wait_for(&mut events, |e| matches!(e, DomainEvent::ModelFailed { .. })).await;
        assert!(h.store.exchanges().await.is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_apology() {
        let h = harness(SequentialMockProvider::scripted(vec![
            ScriptedStep::FailMidStream {
                text: "Déjame verificar eso...".into(),
                error: ProviderError::StreamInterrupted("reset".into()),
            },
        ]));
        let mut req = request("¿Tengo paquetes?", Some("s-1"));
        req.locale = Some(Locale::Es);

        let text = answer(&h.concierge, req).await;

        assert!(text.starts_with("Déjame verificar eso..."));
        assert!(text.ends_with(Locale::Es.interruption_apology()));
        assert!(h.store.exchanges().await.is_empty());
    }

    #[tokio::test]
    async fn disconnected_caller_is_not_recorded() {
        let h = harness(SequentialMockProvider::single_text("A long answer nobody hears."));
        let mut events = h.bus.subscribe();

        let rx = h.concierge.start(request("Hi", Some("s-1"))).unwrap();
        drop(rx);

        wait_for(&mut events, |e| matches!(e, DomainEvent::TurnCompleted { .. })).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.store.exchanges().await.is_empty());
    }
}
