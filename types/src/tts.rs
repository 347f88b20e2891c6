mod settings;
mod stream;

pub use settings::{GenerationConfig, VoiceSettings};
pub use stream::{StreamInputFrame, StreamOutputFrame};

/// Body of a whole-utterance synthesis request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SpeechRequest {
    text: String,
    model_id: String,
    voice_settings: VoiceSettings,
}

impl SpeechRequest {
    pub fn new(text: &str, model_id: &str) -> Self {
        Self {
            text: text.to_string(),
            model_id: model_id.to_string(),
            voice_settings: VoiceSettings::default().with_style(0.0),
        }
    }

    pub fn with_voice_settings(mut self, voice_settings: VoiceSettings) -> Self {
        self.voice_settings = voice_settings;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn voice_settings(&self) -> &VoiceSettings {
        &self.voice_settings
    }
}
