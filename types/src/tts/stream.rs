use crate::tts::{GenerationConfig, VoiceSettings};
use crate::Base64EncodedAudioBytes;

/// Frame sent to the streaming synthesis socket.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamInputFrame {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<VoiceSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flush: Option<bool>,
}

impl StreamInputFrame {
    /// Opening frame. The provider expects a single space as its text.
    pub fn initialize(voice_settings: VoiceSettings, generation_config: GenerationConfig) -> Self {
        Self {
            text: " ".to_string(),
            voice_settings: Some(voice_settings),
            generation_config: Some(generation_config),
            flush: None,
        }
    }

    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            voice_settings: None,
            generation_config: None,
            flush: None,
        }
    }

    /// End of input: generate whatever is buffered and finish.
    pub fn flush() -> Self {
        Self {
            text: String::new(),
            voice_settings: None,
            generation_config: None,
            flush: Some(true),
        }
    }

    pub fn content(&self) -> &str {
        &self.text
    }

    pub fn is_flush(&self) -> bool {
        self.flush.unwrap_or(false)
    }
}

/// Frame received from the streaming synthesis socket.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOutputFrame {
    #[serde(default)]
    audio: Option<Base64EncodedAudioBytes>,
    #[serde(default)]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StreamOutputFrame {
    pub fn audio(&self) -> Option<&str> {
        self.audio.as_deref().filter(|audio| !audio.is_empty())
    }

    pub fn is_final(&self) -> bool {
        self.is_final.unwrap_or(false)
    }

    /// Provider-reported failure, if the frame carries one.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}
