/// Speech-to-text response. Providers answer with either `text` or
/// `transcription`; `text` wins when both are present and non-blank.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    language_code: Option<String>,
}

impl TranscriptionResponse {
    pub fn transcript(&self) -> Option<&str> {
        [self.text.as_deref(), self.transcription.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|text| !text.is_empty())
    }

    pub fn language_code(&self) -> Option<&str> {
        self.language_code.as_deref()
    }
}
