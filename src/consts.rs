use std::time::Duration;

pub const SPEECH_TO_TEXT_API_KEY: &str = "SPEECH_TO_TEXT_API_KEY";
pub const TEXT_TO_SPEECH_API_KEY: &str = "TEXT_TO_SPEECH_API_KEY";
pub const ELEVENLABS_API_KEY: &str = "ELEVENLABS_API_KEY";
pub const VOICE_ID: &str = "VOICE_ID";
pub const MODEL_ID: &str = "MODEL_ID";
pub const TRANSCRIPTION_MODEL: &str = "TRANSCRIPTION_MODEL";
pub const RAG_BACKEND_URL: &str = "RAG_BACKEND_URL";
pub const STREAMING_TOKEN_THRESHOLD: &str = "STREAMING_TOKEN_THRESHOLD";
pub const WELCOME_MESSAGE: &str = "WELCOME_MESSAGE";
pub const RUST_LOG: &str = "RUST_LOG";

pub const SPEECH_TO_TEXT_URL: &str = "https://api.elevenlabs.io/v1/speech-to-text";
pub const TEXT_TO_SPEECH_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
pub const TEXT_TO_SPEECH_STREAM_URL: &str = "wss://api.elevenlabs.io/v1/text-to-speech";
pub const DEFAULT_RAG_BACKEND_URL: &str = "http://localhost:8000";

pub const DEFAULT_VOICE_ID: &str = "foB7BprNxwUpIFQmq811";
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "scribe_v1";
pub const PCM_OUTPUT_FORMAT: &str = "pcm_22050";

pub const XI_API_KEY_HEADER: &str = "xi-api-key";

pub const MIN_RECORDING_DURATION: Duration = Duration::from_millis(500);
pub const MIN_RECORDING_BYTES: usize = 100;
pub const DEFAULT_TOKEN_THRESHOLD: usize = 5;
pub const TAP_PROMPT_TIMEOUT: Duration = Duration::from_secs(8);
pub const CHANNEL_CAPACITY: usize = 1024;

pub const DEFAULT_WELCOME_MESSAGE: &str = "Hi there! I can answer your questions about my work \
    and experience at any hour. What would you like to know? Press and hold to speak to me.";
pub const DEMO_MODE_ANSWER: &str = "Demo mode: No API key configured. \
    Please add your speech API key for real AI responses.";
pub const APOLOGY_ANSWER: &str =
    "I'm sorry, but I'm having trouble connecting to my knowledge base.";
pub const EMPTY_ANSWER: &str = "I apologize, but I could not generate a response at this time.";
