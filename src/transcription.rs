use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::capture::RecordedAudio;
use crate::config::{Config, ConfigError};
use crate::consts::XI_API_KEY_HEADER;
use crate::types::TranscriptionResponse;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptionError {
    #[error("speech-to-text service returned {status}")]
    ServiceUnavailable { status: u16, body: String },
    #[error("no speech was recognized")]
    EmptyTranscript,
    #[error("network error: {0}")]
    NetworkError(String),
}

impl From<reqwest::Error> for TranscriptionError {
    fn from(e: reqwest::Error) -> Self {
        TranscriptionError::NetworkError(e.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &RecordedAudio) -> Result<String, TranscriptionError>;
}

/// Uploads one recording per call. Failures are returned as-is; callers
/// decide what to show.
pub struct TranscriptionClient {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
}

impl TranscriptionClient {
    pub fn new(http: reqwest::Client, url: &str, api_key: SecretString, model: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Result<Self, ConfigError> {
        let api_key = config
            .speech_to_text_key()
            .ok_or_else(|| {
                ConfigError::MissingVar(crate::consts::SPEECH_TO_TEXT_API_KEY.to_string())
            })?;
        Ok(Self::new(
            http,
            config.speech_to_text_url(),
            SecretString::from(api_key.expose_secret().to_string()),
            config.transcription_model(),
        ))
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, audio: &RecordedAudio) -> Result<String, TranscriptionError> {
        let file = Part::bytes(audio.bytes().to_vec())
            .file_name(audio.file_name())
            .mime_str(audio.mime_type())?;
        let form = Form::new().part("file", file).text("model_id", self.model.clone());

        tracing::debug!("uploading {} bytes for transcription", audio.bytes().len());
        let response = self
            .http
            .post(&self.url)
            .header(XI_API_KEY_HEADER, self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("transcription failed with {}: {}", status, body);
            return Err(TranscriptionError::ServiceUnavailable { status: status.as_u16(), body });
        }

        let payload: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::warn!("unreadable transcription response: {}", e);
            TranscriptionError::EmptyTranscript
        })?;
        let transcript = payload.transcript().ok_or(TranscriptionError::EmptyTranscript)?;
        tracing::info!("transcribed: {}", transcript);
        Ok(transcript.to_string())
    }
}
