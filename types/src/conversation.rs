use std::fmt;

/// Visible state of the assistant. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl ConversationState {
    /// Name understood by the sphere renderer.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Listening => "listening",
            ConversationState::Thinking => "thinking",
            ConversationState::Speaking => "speaking",
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, ConversationState::Thinking | ConversationState::Speaking)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of text queued for synthesis and playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
    sequence: u64,
}

impl Utterance {
    pub fn new(text: impl Into<String>, sequence: u64) -> Self {
        Self {
            text: text.into(),
            sequence,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
