//! Browser-facing API.
//!
//! Endpoints:
//!
//! - `POST /api/chat`: Chat turn, answered as a streamed `text/plain` body
//! - `POST /api/transcribe`: Multipart `audio` (+ `language`) → `{"text"}`
//! - `POST /api/synthesize`: `{"text","language"}` → `audio/mpeg`

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{error, info, warn};

use crate::SharedState;
use tides_agent::{ChatRequest, open_text_stream};
use tides_core::error::Error;
use tides_core::locale::Locale;
use tides_core::message::{Message, SessionId};
use tides_speech::SpeechError;

// ── DTOs ──────────────────────────────────────────────────────────────────

/// `POST /api/chat` request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub unit_number: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl ChatBody {
    fn into_request(self) -> ChatRequest {
        ChatRequest {
            messages: self.messages,
            session_id: self.session_id.as_deref().and_then(SessionId::parse),
            unit_number: self
                .unit_number
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            locale: self.language.as_deref().map(Locale::parse),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeBody {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map a speech failure to a response. Upstream failures keep the
/// upstream status with a generic message.
fn speech_error(e: SpeechError, upstream_message: &str) -> ApiError {
    match e {
        SpeechError::NotConfigured(_) => {
            error!(error = %e, "Speech service not configured");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        SpeechError::EmptyInput(_) | SpeechError::InvalidInput(_) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        SpeechError::Upstream { status, .. } => api_error(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            upstream_message,
        ),
        SpeechError::Network(_) | SpeechError::InvalidResponse(_) => {
            error!(error = %e, "Speech request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /api/chat`: run a turn and stream the answer text.
///
/// A model failure before any text is produced answers 502 with a JSON
/// error; later failures end the stream with a spoken apology.
pub async fn chat_handler(
    State(state): State<SharedState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let request = body.into_request();
    info!(
        messages = request.messages.len(),
        session = request.session_id.as_ref().map(SessionId::as_str).unwrap_or("-"),
        "Chat request"
    );

    let rx = state.concierge.start(request).map_err(|e| match e {
        Error::InvalidRequest(message) => api_error(StatusCode::BAD_REQUEST, message),
        other => {
            error!(error = %other, "Could not start chat turn");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    })?;

    let text = open_text_stream(rx).await.map_err(|message| {
        warn!(error = %message, "Chat failed before streaming");
        api_error(StatusCode::BAD_GATEWAY, "The assistant is unavailable right now.")
    })?;

    let stream = text
        .into_stream()
        .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk)));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// `POST /api/transcribe`: forward a recording to the transcription service.
pub async fn transcribe_handler(
    State(state): State<SharedState>,
    mut form: Multipart,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    let mut audio: Option<(Bytes, String)> = None;
    let mut language: Option<String> = None;

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let mime = field.content_type().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
                audio = Some((data, mime));
            }
            "language" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
                language = Some(value);
            }
            _ => {}
        }
    }

    let Some((data, mime)) = audio.filter(|(data, _)| !data.is_empty()) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "No audio file provided"));
    };
    let locale = language
        .as_deref()
        .map(Locale::parse)
        .unwrap_or(state.concierge.default_locale());

    let text = state
        .transcription
        .transcribe(data, &mime, locale)
        .await
        .map_err(|e| speech_error(e, "Transcription failed"))?;

    Ok(Json(TranscriptionResponse { text }))
}

/// `POST /api/synthesize`: speak a text with the locale's voice.
pub async fn synthesize_handler(
    State(state): State<SharedState>,
    Json(body): Json<SynthesizeBody>,
) -> Result<Response, ApiError> {
    if body.text.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No text provided"));
    }
    let locale = body
        .language
        .as_deref()
        .map(Locale::parse)
        .unwrap_or(state.concierge.default_locale());

    let audio = state
        .synthesis
        .synthesize(&body.text, locale)
        .await
        .map_err(|e| speech_error(e, "Synthesis failed"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg".to_string()),
            (header::CONTENT_LENGTH, audio.len().to_string()),
        ],
        audio,
    )
        .into_response())
}
