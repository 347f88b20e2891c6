use std::env;
use std::time::Duration;

use secrecy::SecretString;
use tracing::Level;

use crate::consts;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Settings for one assistant session. Missing provider keys put the
/// assistant in demo mode.
#[derive(Debug)]
pub struct Config {
    speech_to_text_key: Option<SecretString>,
    text_to_speech_key: Option<SecretString>,
    voice_id: String,
    model_id: String,
    transcription_model: String,
    rag_backend_url: String,
    speech_to_text_url: String,
    text_to_speech_url: String,
    text_to_speech_stream_url: String,
    token_threshold: usize,
    tap_prompt_timeout: Duration,
    welcome_message: Option<String>,
    log_level: Level,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_speech_to_text_key(mut self, api_key: &str) -> Self {
        self.config.speech_to_text_key = Some(SecretString::from(api_key.to_string()));
        self
    }

    pub fn with_text_to_speech_key(mut self, api_key: &str) -> Self {
        self.config.text_to_speech_key = Some(SecretString::from(api_key.to_string()));
        self
    }

    pub fn with_voice_id(mut self, voice_id: &str) -> Self {
        self.config.voice_id = voice_id.to_string();
        self
    }

    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.config.model_id = model_id.to_string();
        self
    }

    pub fn with_transcription_model(mut self, model: &str) -> Self {
        self.config.transcription_model = model.to_string();
        self
    }

    pub fn with_rag_backend_url(mut self, url: &str) -> Self {
        self.config.rag_backend_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_speech_to_text_url(mut self, url: &str) -> Self {
        self.config.speech_to_text_url = url.to_string();
        self
    }

    pub fn with_text_to_speech_url(mut self, url: &str) -> Self {
        self.config.text_to_speech_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_text_to_speech_stream_url(mut self, url: &str) -> Self {
        self.config.text_to_speech_stream_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_threshold(mut self, threshold: usize) -> Self {
        self.config.token_threshold = threshold.max(1);
        self
    }

    pub fn with_tap_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.config.tap_prompt_timeout = timeout;
        self
    }

    pub fn with_welcome_message(mut self, message: &str) -> Self {
        self.config.welcome_message = Some(message.to_string());
        self
    }

    pub fn without_welcome_message(mut self) -> Self {
        self.config.welcome_message = None;
        self
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            speech_to_text_key: None,
            text_to_speech_key: None,
            voice_id: consts::DEFAULT_VOICE_ID.to_string(),
            model_id: consts::DEFAULT_MODEL_ID.to_string(),
            transcription_model: consts::DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            rag_backend_url: consts::DEFAULT_RAG_BACKEND_URL.to_string(),
            speech_to_text_url: consts::SPEECH_TO_TEXT_URL.to_string(),
            text_to_speech_url: consts::TEXT_TO_SPEECH_URL.to_string(),
            text_to_speech_stream_url: consts::TEXT_TO_SPEECH_STREAM_URL.to_string(),
            token_threshold: consts::DEFAULT_TOKEN_THRESHOLD,
            tap_prompt_timeout: consts::TAP_PROMPT_TIMEOUT,
            welcome_message: Some(consts::DEFAULT_WELCOME_MESSAGE.to_string()),
            log_level: Level::INFO,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Loads configuration from the process environment, reading a `.env`
    /// file first when one is present.
    ///
    // *   `SPEECH_TO_TEXT_API_KEY` / `TEXT_TO_SPEECH_API_KEY`: provider keys, both default to
    //     `ELEVENLABS_API_KEY`.
    // *   `VOICE_ID`, `MODEL_ID`, `TRANSCRIPTION_MODEL`: provider settings.
    // *   `RAG_BACKEND_URL`: base URL of the answer backend. Defaults to "http://localhost:8000".
    // *   `STREAMING_TOKEN_THRESHOLD`: tokens to accumulate before speech starts early.
    //     Defaults to 5.
    // *   `WELCOME_MESSAGE`: spoken on the first press. An empty value disables it.
    // *   `RUST_LOG`: The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let shared_key = var(consts::ELEVENLABS_API_KEY);

        let mut builder = Config::builder();
        if let Some(key) = var(consts::SPEECH_TO_TEXT_API_KEY).or_else(|| shared_key.clone()) {
            builder = builder.with_speech_to_text_key(&key);
        }
        if let Some(key) = var(consts::TEXT_TO_SPEECH_API_KEY).or(shared_key) {
            builder = builder.with_text_to_speech_key(&key);
        }
        if let Some(voice_id) = var(consts::VOICE_ID) {
            builder = builder.with_voice_id(&voice_id);
        }
        if let Some(model_id) = var(consts::MODEL_ID) {
            builder = builder.with_model_id(&model_id);
        }
        if let Some(model) = var(consts::TRANSCRIPTION_MODEL) {
            builder = builder.with_transcription_model(&model);
        }
        if let Some(url) = var(consts::RAG_BACKEND_URL) {
            builder = builder.with_rag_backend_url(&url);
        }
        if let Some(threshold) = var(consts::STREAMING_TOKEN_THRESHOLD) {
            let parsed = threshold
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: consts::STREAMING_TOKEN_THRESHOLD.to_string(),
                    value: threshold.clone(),
                })?;
            builder = builder.with_token_threshold(parsed);
        }
        match lookup(consts::WELCOME_MESSAGE) {
            Some(message) if message.trim().is_empty() => {
                builder = builder.without_welcome_message()
            }
            Some(message) => builder = builder.with_welcome_message(message.trim()),
            None => {}
        }

        let log_level_str = var(consts::RUST_LOG).unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidValue {
                name: consts::RUST_LOG.to_string(),
                value: log_level_str,
            })?;

        Ok(builder.with_log_level(log_level).build())
    }

    /// Demo mode: at least one provider key is missing, so no external
    /// voice service can be reached.
    pub fn is_demo(&self) -> bool {
        self.speech_to_text_key.is_none() || self.text_to_speech_key.is_none()
    }

    pub fn speech_to_text_key(&self) -> Option<&SecretString> {
        self.speech_to_text_key.as_ref()
    }

    pub fn text_to_speech_key(&self) -> Option<&SecretString> {
        self.text_to_speech_key.as_ref()
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn transcription_model(&self) -> &str {
        &self.transcription_model
    }

    pub fn rag_backend_url(&self) -> &str {
        &self.rag_backend_url
    }

    pub fn speech_to_text_url(&self) -> &str {
        &self.speech_to_text_url
    }

    pub fn text_to_speech_url(&self) -> &str {
        &self.text_to_speech_url
    }

    pub fn text_to_speech_stream_url(&self) -> &str {
        &self.text_to_speech_stream_url
    }

    pub fn token_threshold(&self) -> usize {
        self.token_threshold
    }

    pub fn tap_prompt_timeout(&self) -> Duration {
        self.tap_prompt_timeout
    }

    pub fn welcome_message(&self) -> Option<&str> {
        self.welcome_message.as_deref()
    }

    pub fn log_level(&self) -> Level {
        self.log_level
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
