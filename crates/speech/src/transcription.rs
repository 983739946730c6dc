//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.

use crate::error::SpeechError;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tides_config::SpeechConfig;
use tides_core::locale::Locale;
use tracing::{debug, error};

/// File name the recording is uploaded under.
const UPLOAD_FILE_NAME: &str = "recording.webm";

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct TranscriptionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl TranscriptionClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: crate::http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: "whisper-1".into(),
        }
    }

    pub fn from_config(config: &SpeechConfig) -> Self {
        Self::new(
            config.transcription_url.clone(),
            config.transcription_api_key.clone(),
        )
        .with_model(config.transcription_model.clone())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Transcribe a recording in the given language.
    ///
    /// `mime` is the recording's content type as reported by the caller;
    /// blank values are sent as `application/octet-stream`.
    pub async fn transcribe(
        &self,
        audio: Bytes,
        mime: &str,
        locale: Locale,
    ) -> Result<String, SpeechError> {
        if audio.is_empty() {
            return Err(SpeechError::EmptyInput("audio"));
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SpeechError::NotConfigured("Transcription"))?;

        let mime = if mime.trim().is_empty() {
            "application/octet-stream"
        } else {
            mime
        };
        let file = Part::bytes(audio.to_vec())
            .file_name(UPLOAD_FILE_NAME)
            .mime_str(mime)
            .map_err(|e| SpeechError::InvalidInput(format!("content type {mime}: {e}")))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", locale.code());

        debug!(bytes = audio.len(), language = locale.code(), "Sending audio for transcription");
        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %message, "Transcription API error");
            return Err(SpeechError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::InvalidResponse(e.to_string()))?;
        Ok(body.text)
    }
}
