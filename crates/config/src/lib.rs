//! Configuration loading, validation, and management for Tides.
//!
//! Loads configuration from `~/.tides/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tides_core::Locale;

/// The root configuration structure.
///
/// Maps directly to `~/.tides/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Storage backend configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Transcription and synthesis services
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("storage", &self.storage)
            .field("gateway", &self.gateway)
            .field("speech", &self.speech)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("transcription_api_key", &redact(&self.transcription_api_key))
            .field("transcription_url", &self.transcription_url)
            .field("transcription_model", &self.transcription_model)
            .field("synthesis_api_key", &redact(&self.synthesis_api_key))
            .field("synthesis_url", &self.synthesis_url)
            .field("synthesis_model", &self.synthesis_model)
            .field("voice_id", &self.voice_id)
            .field("voice_id_es", &self.voice_id_es)
            .finish()
    }
}

/// How the orchestration loop behaves for every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum model submissions per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// How many recorded exchanges to load as context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Run the tool calls of one step concurrently
    #[serde(default)]
    pub parallel_tools: bool,

    /// Language used when a request does not name one
    #[serde(default)]
    pub default_locale: Locale,
}

fn default_max_steps() -> usize {
    5
}
fn default_history_limit() -> usize {
    10
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            history_limit: default_history_limit(),
            parallel_tools: false,
            default_locale: Locale::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database file for the sqlite backend
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}
fn default_db_path() -> PathBuf {
    AppConfig::config_dir().join("tides.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Largest accepted request body (audio uploads dominate)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Speech-to-text and text-to-speech collaborators.
#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Falls back to the model provider key when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_api_key: Option<String>,

    #[serde(default = "default_transcription_url")]
    pub transcription_url: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_api_key: Option<String>,

    #[serde(default = "default_synthesis_url")]
    pub synthesis_url: String,

    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: String,

    /// Voice used for English and as the fallback for every other language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id_es: Option<String>,
}

fn default_transcription_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_transcription_model() -> String {
    "whisper-1".into()
}
fn default_synthesis_url() -> String {
    "https://api.elevenlabs.io/v1".into()
}
fn default_synthesis_model() -> String {
    "eleven_turbo_v2_5".into()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            transcription_api_key: None,
            transcription_url: default_transcription_url(),
            transcription_model: default_transcription_model(),
            synthesis_api_key: None,
            synthesis_url: default_synthesis_url(),
            synthesis_model: default_synthesis_model(),
            voice_id: None,
            voice_id_es: None,
        }
    }
}

impl SpeechConfig {
    /// The voice for a locale. Spanish falls back to the default voice.
    pub fn voice_for(&self, locale: Locale) -> Option<&str> {
        match locale {
            Locale::Es => self.voice_id_es.as_deref().or(self.voice_id.as_deref()),
            Locale::En => self.voice_id.as_deref(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tides/config.toml).
    ///
    /// Environment variables override the file:
    /// - `TIDES_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `TIDES_MODEL`, `TIDES_DB_PATH`
    /// - `ELEVENLABS_API_KEY`, `ELEVENLABS_VOICE_ID`, `ELEVENLABS_VOICE_ID_ES`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`, so tests never touch
    /// the process environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TIDES_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = lookup("OPENAI_API_KEY");
        }

        if let Some(model) = lookup("TIDES_MODEL") {
            self.default_model = model;
        }

        if let Some(path) = lookup("TIDES_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }

        if self.speech.transcription_api_key.is_none() {
            self.speech.transcription_api_key = lookup("OPENAI_API_KEY").or_else(|| self.api_key.clone());
        }
        if let Some(key) = lookup("ELEVENLABS_API_KEY") {
            self.speech.synthesis_api_key = Some(key);
        }
        if let Some(voice) = lookup("ELEVENLABS_VOICE_ID") {
            self.speech.voice_id = Some(voice);
        }
        if let Some(voice) = lookup("ELEVENLABS_VOICE_ID_ES") {
            self.speech.voice_id_es = Some(voice);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tides")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.history_limit must be at least 1".into(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown storage backend '{}' (expected sqlite or memory)",
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentSettings::default(),
            storage: StorageConfig::default(),
            gateway: GatewayConfig::default(),
            speech: SpeechConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
