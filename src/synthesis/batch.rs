use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Config, ConfigError};
use crate::consts::{PCM_OUTPUT_FORMAT, TEXT_TO_SPEECH_API_KEY, XI_API_KEY_HEADER};
use crate::synthesis::{AudioClip, BatchSynthesizer, SynthesisError};
use crate::types::{SpeechRequest, VoiceSettings};
use crate::utils::audio;

/// Whole-utterance synthesis over plain HTTP.
pub struct BatchClient {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
    model_id: String,
    voice_settings: VoiceSettings,
}

impl BatchClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        voice_id: &str,
        api_key: SecretString,
        model_id: &str,
    ) -> Self {
        Self {
            http,
            url: format!("{}/{}", base_url.trim_end_matches('/'), voice_id),
            api_key,
            model_id: model_id.to_string(),
            voice_settings: VoiceSettings::default().with_style(0.0),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Result<Self, ConfigError> {
        let api_key = config
            .text_to_speech_key()
            .ok_or_else(|| ConfigError::MissingVar(TEXT_TO_SPEECH_API_KEY.to_string()))?;
        Ok(Self::new(
            http,
            config.text_to_speech_url(),
            config.voice_id(),
            SecretString::from(api_key.expose_secret().to_string()),
            config.model_id(),
        ))
    }

    pub fn with_voice_settings(mut self, voice_settings: VoiceSettings) -> Self {
        self.voice_settings = voice_settings;
        self
    }
}

#[async_trait]
impl BatchSynthesizer for BatchClient {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, SynthesisError> {
        let body = SpeechRequest::new(text, &self.model_id)
            .with_voice_settings(self.voice_settings.clone());
        let response = self
            .http
            .post(&self.url)
            .query(&[("output_format", PCM_OUTPUT_FORMAT)])
            .header(XI_API_KEY_HEADER, self.api_key.expose_secret())
            .header(reqwest::header::ACCEPT, "audio/pcm")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("batch synthesis failed with {}: {}", status, body);
            return Err(SynthesisError::ServiceUnavailable { status: status.as_u16(), body });
        }

        let pcm16 = response.bytes().await?;
        let samples = audio::decode_pcm16(&pcm16);
        if samples.is_empty() {
            return Err(SynthesisError::NoAudio);
        }
        tracing::debug!("batch synthesis produced {} samples", samples.len());
        Ok(AudioClip::new(samples, audio::SYNTHESIS_PCM16_SAMPLE_RATE))
    }
}
