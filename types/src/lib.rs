pub mod answer;
pub mod conversation;
pub mod transcription;
pub mod tts;

pub use answer::{AnswerPayload, AskRequest, HealthStatus};
pub use conversation::{ConversationState, Utterance};
pub use transcription::TranscriptionResponse;
pub use tts::{GenerationConfig, SpeechRequest, StreamInputFrame, StreamOutputFrame, VoiceSettings};

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;
