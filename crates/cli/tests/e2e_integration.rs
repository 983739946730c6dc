//! End-to-end tests for the Tides concierge.
//!
//! These wire real stores, the default tool registry, and the HTTP gateway
//! around a scripted model, and check what a resident would hear and what
//! ends up in the database.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::json;
use tides_agent::test_helpers::{
    SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response,
};
use tides_agent::{ChatRequest, Concierge, open_text_stream};
use tides_config::{AppConfig, SpeechConfig, StorageConfig};
use tides_core::event::{DomainEvent, EventBus};
use tides_core::locale::Locale;
use tides_core::message::{Message, MessagePart, Role, SessionId};
use tides_core::store::{Amenity, ConciergeStore};
use tides_gateway::{GatewayState, build_router};
use tides_speech::{SynthesisClient, TranscriptionClient};
use tides_store::{InMemoryStore, SqliteStore};
use tokio::sync::broadcast;
use tower::ServiceExt;

// ── Helpers ──────────────────────────────────────────────────────────────

fn concierge(
    provider: Arc<SequentialMockProvider>,
    store: Arc<dyn ConciergeStore>,
    bus: Arc<EventBus>,
) -> Concierge {
    let tools = Arc::new(tides_tools::default_registry(store.clone()));
    Concierge::from_config(&AppConfig::default(), provider, store, tools, bus)
}

fn turn(text: &str, session: Option<&str>, unit: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![Message::user(text)],
        session_id: session.map(|s| SessionId(s.into())),
        unit_number: Some(unit.into()),
        locale: None,
    }
}

async fn ask(concierge: &Concierge, request: ChatRequest) -> String {
    let rx = concierge.start(request).unwrap();
    let stream = open_text_stream(rx).await.unwrap();
    stream.into_stream().collect::<Vec<_>>().await.concat()
}

async fn wait_for(
    events: &mut broadcast::Receiver<Arc<DomainEvent>>,
    pred: impl Fn(&DomainEvent) -> bool,
) -> Arc<DomainEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
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

fn recorded(event: &DomainEvent) -> bool {
    matches!(event, DomainEvent::ExchangeRecorded { .. })
}

async fn sqlite_store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let url = format!("sqlite://{}", dir.path().join("tides.db").display());
    Arc::new(SqliteStore::new(&url).await.unwrap())
}

// ── Full turns against SQLite ────────────────────────────────────────────

#[tokio::test]
async fn e2e_package_question_then_pickup_with_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    store.add_package("4B", "FedEx").await.unwrap();

    let provider = Arc::new(SequentialMockProvider::new(vec![
        // Turn 1: look up packages, then answer
        make_tool_call_response(
            vec![make_tool_call("check_packages", json!({"unitNumber": "4B"}))],
            "Let me check.",
        ),
        make_text_response("You have one package from FedEx."),
        // Turn 2: log the pickup, then answer
        make_tool_call_response(
            vec![make_tool_call("log_pickup", json!({"unitNumber": "4B"}))],
            "",
        ),
        make_text_response("Done, I marked it as picked up."),
    ]));
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let concierge = concierge(provider.clone(), store.clone(), bus);

    let first = ask(&concierge, turn("Any packages for me?", Some("lobby-1"), "4B")).await;
    assert_eq!(first, "Let me check. You have one package from FedEx.");
    wait_for(&mut events, recorded).await;

    let second = ask(&concierge, turn("I just picked it up.", Some("lobby-1"), "4B")).await;
    assert_eq!(second, "Done, I marked it as picked up.");
    wait_for(&mut events, recorded).await;

    // The second turn's first model call saw the first exchange as history.
    let requests = provider.requests();
    let replayed: Vec<String> = requests[2].messages.iter().map(Message::text).collect();
    assert_eq!(
        replayed,
        vec![
            "Any packages for me?".to_string(),
            "You have one package from FedEx.".to_string(),
            "I just picked it up.".to_string(),
        ]
    );

    assert!(store.query_pending_items("4B").await.unwrap().is_empty());
    let history = store
        .fetch_recent_exchanges(&SessionId("lobby-1".into()), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].messages.last().unwrap().role, Role::Assistant);
}

#[tokio::test]
async fn e2e_sessions_do_not_share_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response("Hello there."),
        make_text_response("Hi again."),
    ]));
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let concierge = concierge(provider.clone(), store, bus);

    ask(&concierge, turn("Hello", Some("alice"), "101")).await;
    wait_for(&mut events, recorded).await;
    ask(&concierge, turn("Hello", Some("bob"), "202")).await;

    assert_eq!(provider.requests()[1].messages.len(), 1);
}

#[tokio::test]
async fn e2e_spanish_turn_uses_spanish_prompt_and_fallback() {
    let store: Arc<dyn ConciergeStore> = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SequentialMockProvider::single_text(""));
    let concierge = concierge(provider.clone(), store, Arc::new(EventBus::default()));

    let mut request = turn("¿Tengo paquetes?", None, "7C");
    request.locale = Some(Locale::Es);
    let text = ask(&concierge, request).await;

    assert_eq!(text, Locale::Es.fallback_answer());
    let system = &provider.requests()[0].system;
    assert!(system.starts_with("Eres Tides"));
    assert!(system.contains("El residente es de la Unidad 7C."));
}

/// Drain whatever is left in the receiver without waiting.
fn concierge_events_since_start(
    events: &mut broadcast::Receiver<Arc<DomainEvent>>,
) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(match &*event {
            DomainEvent::TurnStarted { .. } => "turn_started",
            DomainEvent::ContextDegraded { .. } => "context_degraded",
            DomainEvent::ToolExecuted { .. } => "tool_executed",
            DomainEvent::TurnCompleted { .. } => "turn_completed",
            DomainEvent::ModelFailed { .. } => "model_failed",
            DomainEvent::ExchangeRecorded { .. } => "exchange_recorded",
            DomainEvent::PersistenceFailed { .. } => "persistence_failed",
        });
    }
    names
}

#[tokio::test]
async fn e2e_event_sequence_for_a_tool_turn() {
    let store: Arc<dyn ConciergeStore> = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SequentialMockProvider::tool_then_answer(
        vec![make_tool_call("check_packages", json!({"unitNumber": "101"}))],
        "",
        "Nothing waiting for you.",
    ));
    let bus = Arc::new(EventBus::default());
    let mut observer = bus.subscribe();
    let mut waiter = bus.subscribe();
    let concierge = concierge(provider, store, bus);

    ask(&concierge, turn("Packages?", Some("s1"), "101")).await;
    wait_for(&mut waiter, recorded).await;

    assert_eq!(
        concierge_events_since_start(&mut observer),
        vec!["turn_started", "tool_executed", "turn_completed", "exchange_recorded"]
    );
}

// ── Gateway over HTTP ────────────────────────────────────────────────────

fn gateway(concierge: Concierge) -> axum::Router {
    let speech = SpeechConfig::default();
    let state = Arc::new(GatewayState::new(
        Arc::new(concierge),
        TranscriptionClient::from_config(&speech),
        SynthesisClient::from_config(&speech),
    ));
    build_router(state, 1024 * 1024)
}

#[tokio::test]
async fn e2e_gateway_booking_lands_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let provider = Arc::new(SequentialMockProvider::tool_then_answer(
        vec![make_tool_call(
            "book_amenity",
            json!({"unitNumber": "12A", "amenity": "rooftop_terrace", "time": "2026-10-24T18:00:00Z"}),
        )],
        "One moment.",
        "The rooftop terrace is yours on Saturday at six.",
    ));
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let app = gateway(concierge(provider.clone(), store.clone(), bus));

    let body = json!({
        "messages": [{"role": "user", "parts": [{"type": "text", "text": "Book the rooftop for Saturday at 6pm"}]}],
        "sessionId": "kiosk-3",
        "unitNumber": "12A",
        "language": "en"
    });
    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        String::from_utf8(bytes.to_vec()).unwrap(),
        "One moment. The rooftop terrace is yours on Saturday at six."
    );
    wait_for(&mut events, recorded).await;

    let bookings = store.bookings_for("12A").await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].amenity, Amenity::RooftopTerrace);
    assert_eq!(bookings[0].time, "2026-10-24T18:00:00Z");

    assert_eq!(
        tool_outputs(&provider.requests()[1].messages),
        vec!["Successfully booked the rooftop terrace for 2026-10-24T18:00:00Z."]
    );
}

#[tokio::test]
async fn e2e_gateway_rejects_empty_conversation() {
    let store: Arc<dyn ConciergeStore> = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SequentialMockProvider::new(vec![]));
    let app = gateway(concierge(provider.clone(), store, Arc::new(EventBus::default())));

    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({"messages": []}).to_string()))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.call_count(), 0);
}

// ── Configuration ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_default_config_round_trips_and_builds_a_store() {
    let parsed: AppConfig = toml_from_default();
    assert_eq!(parsed.agent.max_steps, AppConfig::default().agent.max_steps);
    assert!(parsed.validate().is_ok());

    let memory = StorageConfig {
        backend: "memory".into(),
        path: "unused.db".into(),
    };
    let store = tides_store::build_from_config(&memory).await.unwrap();
    assert_eq!(store.name(), "memory");
}

fn toml_from_default() -> AppConfig {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, AppConfig::default_toml()).unwrap();
    AppConfig::load_from(&path).unwrap()
}
