#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<f32>,
    use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.7,
            similarity_boost: 0.7,
            style: None,
            use_speaker_boost: true,
        }
    }
}

impl VoiceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stability(mut self, stability: f32) -> Self {
        self.stability = stability;
        self
    }

    pub fn with_similarity_boost(mut self, similarity_boost: f32) -> Self {
        self.similarity_boost = similarity_boost;
        self
    }

    pub fn with_style(mut self, style: f32) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_speaker_boost(mut self, use_speaker_boost: bool) -> Self {
        self.use_speaker_boost = use_speaker_boost;
        self
    }

    pub fn stability(&self) -> f32 {
        self.stability
    }

    pub fn similarity_boost(&self) -> f32 {
        self.similarity_boost
    }

    pub fn style(&self) -> Option<f32> {
        self.style
    }

    pub fn use_speaker_boost(&self) -> bool {
        self.use_speaker_boost
    }
}

/// Controls how much text the streaming synthesizer buffers before it
/// starts generating audio.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationConfig {
    chunk_length_schedule: Vec<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            chunk_length_schedule: vec![50, 90, 120, 150, 200],
        }
    }
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_length_schedule(mut self, schedule: Vec<u32>) -> Self {
        self.chunk_length_schedule = schedule;
        self
    }

    pub fn chunk_length_schedule(&self) -> &[u32] {
        &self.chunk_length_schedule
    }
}
