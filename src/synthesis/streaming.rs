use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::config::{Config, ConfigError};
use crate::consts::{CHANNEL_CAPACITY, TEXT_TO_SPEECH_API_KEY};
use crate::synthesis::{
    utils, StreamCommand, StreamingSynthesizer, SynthesisError, SynthesisFrame, SynthesisStream,
};
use crate::types::{GenerationConfig, StreamInputFrame, StreamOutputFrame, VoiceSettings};
use crate::utils::audio;

type FrameTx = mpsc::Sender<Result<SynthesisFrame, SynthesisError>>;

/// Incremental synthesis over the provider's `stream-input` websocket. Each
/// [`open`](StreamingSynthesizer::open) makes a fresh connection.
pub struct StreamingClient {
    capacity: usize,
    url: String,
    api_key: SecretString,
    voice_settings: VoiceSettings,
    generation_config: GenerationConfig,
}

impl StreamingClient {
    pub fn new(url: &str, api_key: SecretString) -> Self {
        Self {
            capacity: CHANNEL_CAPACITY,
            url: url.to_string(),
            api_key,
            voice_settings: VoiceSettings::default(),
            generation_config: GenerationConfig::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config
            .text_to_speech_key()
            .ok_or_else(|| ConfigError::MissingVar(TEXT_TO_SPEECH_API_KEY.to_string()))?;
        let url = utils::stream_url(
            config.text_to_speech_stream_url(),
            config.voice_id(),
            config.model_id(),
        );
        Ok(Self::new(&url, SecretString::from(api_key.expose_secret().to_string())))
    }

    pub fn with_voice_settings(mut self, voice_settings: VoiceSettings) -> Self {
        self.voice_settings = voice_settings;
        self
    }

    pub fn with_generation_config(mut self, generation_config: GenerationConfig) -> Self {
        self.generation_config = generation_config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamingSynthesizer for StreamingClient {
    async fn open(&self) -> Result<SynthesisStream, SynthesisError> {
        let request = utils::build_request(&self.url, &self.api_key)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let init = StreamInputFrame::initialize(
            self.voice_settings.clone(),
            self.generation_config.clone(),
        );
        let init =
            serde_json::to_string(&init).map_err(|e| SynthesisError::Protocol(e.to_string()))?;
        write.send(Message::Text(init)).await?;
        tracing::debug!("synthesis stream opened");

        let (c_tx, mut c_rx) = mpsc::channel::<StreamCommand>(self.capacity);
        let (f_tx, f_rx) = mpsc::channel(self.capacity);

        let error_tx = f_tx.clone();
        tokio::spawn(async move {
            while let Some(command) = c_rx.recv().await {
                let frame = match &command {
                    StreamCommand::Text(text) => StreamInputFrame::text(text),
                    StreamCommand::Flush => StreamInputFrame::flush(),
                    StreamCommand::Close => break,
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to serialize frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("failed to send synthesis text: {}", e);
                    let _ = error_tx.send(Err(SynthesisError::Connection(e.to_string()))).await;
                    return;
                }
                if command == StreamCommand::Flush {
                    // The provider closes the socket once the last audio is sent.
                    return;
                }
            }
            tracing::debug!("closing synthesis stream before its flush");
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!("failed to close synthesis stream: {}", e);
            }
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read synthesis message: {}", e);
                        let _ = f_tx.send(Err(SynthesisError::Connection(e.to_string()))).await;
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => {
                        if !forward_frame(&text, &f_tx).await {
                            break;
                        }
                    }
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::debug!("synthesis stream closed: {:?}", reason);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(SynthesisStream::new(c_tx, f_rx, audio::SYNTHESIS_PCM16_SAMPLE_RATE))
    }
}

/// Returns `false` when no further frames should be read.
async fn forward_frame(text: &str, frames: &FrameTx) -> bool {
    let frame = match serde_json::from_str::<StreamOutputFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("failed to deserialize synthesis frame: {}", e);
            return true;
        }
    };
    if let Some(error) = frame.error() {
        let _ = frames.send(Err(SynthesisError::Protocol(error.to_string()))).await;
        return false;
    }
    if let Some(fragment) = frame.audio() {
        match audio::decode(fragment) {
            Ok(samples) => {
                if frames.send(Ok(SynthesisFrame::Audio(samples))).await.is_err() {
                    return false;
                }
            }
            Err(e) => tracing::warn!("dropping undecodable audio frame: {}", e),
        }
    }
    if frame.is_final() {
        let _ = frames.send(Ok(SynthesisFrame::Final)).await;
        return false;
    }
    true
}
