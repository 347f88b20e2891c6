use std::sync::Arc;

use crate::answer::{AnswerSource, RagClient};
use crate::capture::{CpalMicrophone, Microphone};
use crate::config::{Config, ConfigError};
use crate::playback::{AudioOutput, CpalOutput};
use crate::synthesis::{BatchClient, SpeechSynthesizer, StreamingClient};
use crate::transcription::{Transcriber, TranscriptionClient};
use crate::ui::ConversationUi;

/// The remote services behind a voice turn.
#[derive(Clone)]
pub struct VoiceServices {
    transcriber: Arc<dyn Transcriber>,
    answers: Arc<dyn AnswerSource>,
    synthesizer: SpeechSynthesizer,
}

impl VoiceServices {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        answers: Arc<dyn AnswerSource>,
        synthesizer: SpeechSynthesizer,
    ) -> Self {
        Self {
            transcriber,
            answers,
            synthesizer,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Result<Self, ConfigError> {
        let transcriber = TranscriptionClient::from_config(http.clone(), config)?;
        let answers = RagClient::from_config(http.clone(), config);
        let streaming = StreamingClient::from_config(config)?;
        let batch = BatchClient::from_config(http, config)?;
        Ok(Self::new(
            Arc::new(transcriber),
            Arc::new(answers),
            SpeechSynthesizer::new(Arc::new(streaming), Arc::new(batch)),
        ))
    }

    pub fn transcriber(&self) -> &Arc<dyn Transcriber> {
        &self.transcriber
    }

    pub fn answers(&self) -> &Arc<dyn AnswerSource> {
        &self.answers
    }

    pub fn synthesizer(&self) -> &SpeechSynthesizer {
        &self.synthesizer
    }
}

/// Everything one assistant session runs with. Built once and handed to
/// the controller.
pub struct AssistantContext {
    config: Arc<Config>,
    ui: Arc<dyn ConversationUi>,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn AudioOutput>,
    services: Option<VoiceServices>,
}

impl AssistantContext {
    /// Native devices and real services. Without provider keys the context
    /// is built without services and the assistant runs in demo mode.
    pub fn from_config(config: Config, ui: Arc<dyn ConversationUi>) -> Result<Self, ConfigError> {
        let services = if config.is_demo() {
            tracing::warn!("provider keys missing, running in demo mode");
            None
        } else {
            Some(VoiceServices::from_config(reqwest::Client::new(), &config)?)
        };
        let mut builder = Self::builder(config, ui);
        if let Some(services) = services {
            builder = builder.with_services(services);
        }
        Ok(builder.build())
    }

    pub fn builder(config: Config, ui: Arc<dyn ConversationUi>) -> AssistantContextBuilder {
        AssistantContextBuilder {
            config,
            ui,
            microphone: None,
            output: None,
            services: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ui(&self) -> &Arc<dyn ConversationUi> {
        &self.ui
    }

    pub fn microphone(&self) -> &Arc<dyn Microphone> {
        &self.microphone
    }

    pub fn output(&self) -> &Arc<dyn AudioOutput> {
        &self.output
    }

    pub fn services(&self) -> Option<&VoiceServices> {
        self.services.as_ref()
    }

    pub fn is_demo(&self) -> bool {
        self.services.is_none()
    }
}

pub struct AssistantContextBuilder {
    config: Config,
    ui: Arc<dyn ConversationUi>,
    microphone: Option<Arc<dyn Microphone>>,
    output: Option<Arc<dyn AudioOutput>>,
    services: Option<VoiceServices>,
}

impl AssistantContextBuilder {
    pub fn with_microphone(mut self, microphone: Arc<dyn Microphone>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn with_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_services(mut self, services: VoiceServices) -> Self {
        self.services = Some(services);
        self
    }

    pub fn build(self) -> AssistantContext {
        AssistantContext {
            config: Arc::new(self.config),
            ui: self.ui,
            microphone: self.microphone.unwrap_or_else(|| Arc::new(CpalMicrophone::default())),
            output: self.output.unwrap_or_else(|| Arc::new(CpalOutput::default())),
            services: self.services,
        }
    }
}
