//! HTTP gateway for Tides.
//!
//! Exposes the voice concierge to browser front-ends:
//! chat (streamed plain text), transcription, speech synthesis, and a
//! health check.
//!
//! Built on Axum for high performance async HTTP.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::{Router, response::Json, routing::get, routing::post};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use tides_agent::Concierge;
use tides_core::event::{DomainEvent, EventBus};
use tides_speech::{SynthesisClient, TranscriptionClient};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub concierge: Arc<Concierge>,
    pub transcription: TranscriptionClient,
    pub synthesis: SynthesisClient,
}

impl GatewayState {
    pub fn new(
        concierge: Arc<Concierge>,
        transcription: TranscriptionClient,
        synthesis: SynthesisClient,
    ) -> Self {
        Self {
            concierge,
            transcription,
            synthesis,
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS for browser front-ends (GET/POST, JSON and multipart bodies)
/// - Request body size limit (`max_body_bytes`, sized for audio uploads)
/// - HTTP trace logging
pub fn build_router(state: SharedState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(api::chat_handler))
        .route("/api/transcribe", post(api::transcribe_handler))
        .route("/api/synthesize", post(api::synthesize_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Builds provider, store, tools, and event bus once and shares them
/// across requests.
pub async fn start(config: tides_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let router = tides_providers::build_from_config(&config);
    let provider = router
        .default()
        .ok_or("No default provider configured. Set an API key")?;
    let store = tides_store::build_from_config(&config.storage).await?;
    let tools = Arc::new(tides_tools::default_registry(store.clone()));
    let event_bus = Arc::new(EventBus::default());
    spawn_event_logger(&event_bus);

    let concierge = Concierge::from_config(&config, provider, store, tools, event_bus);
    let state = Arc::new(GatewayState::new(
        Arc::new(concierge),
        TranscriptionClient::from_config(&config.speech),
        SynthesisClient::from_config(&config.speech),
    ));
    if !state.transcription.is_configured() {
        warn!("Transcription key missing, /api/transcribe will answer 500");
    }

    let app = build_router(state, config.gateway.max_body_bytes);

    info!(addr = %addr, model = %config.default_model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Log domain events as they are published.
fn spawn_event_logger(bus: &Arc<EventBus>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match &*event {
                    DomainEvent::ToolExecuted {
                        tool_name,
                        success,
                        duration_ms,
                        ..
                    } => debug!(tool = %tool_name, success, duration_ms, "event: tool executed"),
                    other => debug!(event = ?other, "event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
