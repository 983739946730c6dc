use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SpeechError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream request failed: {message} (status: {status})")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for SpeechError {
    fn from(e: reqwest::Error) -> Self {
        SpeechError::Network(e.to_string())
    }
}
