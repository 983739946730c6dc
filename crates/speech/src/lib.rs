//! Speech collaborators for Tides.
//!
//! - [`TranscriptionClient`]: recorded audio in, text out (Whisper-style API)
//! - [`SynthesisClient`]: text in, `audio/mpeg` out (ElevenLabs-style API)
//!
//! Both are thin `reqwest` clients configured from [`tides_config::SpeechConfig`].

pub mod error;
pub mod synthesis;
pub mod transcription;

pub use error::SpeechError;
pub use synthesis::SynthesisClient;
pub use transcription::TranscriptionClient;

use std::time::Duration;
use tracing::warn;

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}
