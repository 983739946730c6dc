//! Text-to-speech over an ElevenLabs-style `/text-to-speech/{voice}` endpoint.

use crate::error::SpeechError;
use bytes::Bytes;
use serde::Serialize;
use tides_config::SpeechConfig;
use tides_core::locale::Locale;
use tracing::{debug, error};

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

const VOICE_SETTINGS: VoiceSettings = VoiceSettings {
    stability: 0.5,
    similarity_boost: 0.75,
    style: 0.0,
    use_speaker_boost: true,
};

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

pub struct SynthesisClient {
    client: reqwest::Client,
    config: SpeechConfig,
}

impl SynthesisClient {
    pub fn from_config(config: &SpeechConfig) -> Self {
        let mut config = config.clone();
        config.synthesis_url = config.synthesis_url.trim_end_matches('/').to_string();
        Self {
            client: crate::http_client(),
            config,
        }
    }

    /// Whether a key and a voice for `locale` are both available.
    pub fn is_configured(&self, locale: Locale) -> bool {
        self.config.synthesis_api_key.is_some() && self.config.voice_for(locale).is_some()
    }

    /// Speak `text` with the voice configured for `locale`. Returns MP3 bytes.
    pub async fn synthesize(&self, text: &str, locale: Locale) -> Result<Bytes, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyInput("text"));
        }
        let (Some(api_key), Some(voice_id)) = (
            self.config.synthesis_api_key.as_deref(),
            self.config.voice_for(locale),
        ) else {
            return Err(SpeechError::NotConfigured("ElevenLabs"));
        };

        let body = SynthesisRequest {
            text,
            model_id: &self.config.synthesis_model,
            voice_settings: &VOICE_SETTINGS,
        };

        debug!(chars = text.len(), voice = voice_id, language = locale.code(), "Requesting speech");
        let response = self
            .client
            .post(format!("{}/text-to-speech/{voice_id}", self.config.synthesis_url))
            .header("xi-api-key", api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %message, "Synthesis API error");
            return Err(SpeechError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?)
    }
}
