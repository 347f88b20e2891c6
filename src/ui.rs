use tokio::sync::oneshot;

use crate::types::ConversationState;

/// Status lines shown next to the sphere.
pub mod status {
    pub const READY: &str = "Ready to chat";
    pub const LISTENING: &str = "Listening...";
    pub const PROCESSING_QUESTION: &str = "Processing question...";
    pub const SEARCHING_KNOWLEDGE: &str = "Searching knowledge...";
    pub const RAG_THINKING: &str = "RAG thinking...";
    pub const SPEAKING: &str = "Speaking...";
    pub const CREATING_SPEECH: &str = "Creating speech...";
    pub const ANSWERING: &str = "Answering...";
    pub const VOICE_NOT_AVAILABLE: &str = "Voice not available";
    pub const TAP_FOR_AUDIO: &str = "Tap sphere for audio";
    pub const PLAYING_WELCOME: &str = "Playing welcome message...";
    pub const NO_AUDIO_CAPTURED: &str = "No audio captured. Please try again.";
    pub const RECORDING_TOO_SHORT: &str =
        "Recording too short. Please hold the button while speaking.";
    pub const MICROPHONE_ERROR: &str = "Microphone not available";
}

/// The surface the assistant drives. Implementations must be cheap and
/// non-blocking: they are called from the controller and pipeline tasks.
pub trait ConversationUi: Send + Sync {
    /// Sphere animation state.
    fn set_state(&self, state: ConversationState);

    fn set_status(&self, status: &str);

    /// Text shown instead of (or in addition to) audio.
    fn show_text(&self, text: &str);

    /// Asks the visitor to tap the sphere so audio may play. The returned
    /// prompt resolves when tapped; dropping the trigger declines.
    fn show_tap_prompt(&self) -> TapPrompt;

    fn dismiss_tap_prompt(&self);

    fn show_transcript(&self, _text: &str) {}

    /// Answer text accumulated so far.
    fn show_answer(&self, _partial: &str) {}

    /// Caption of the utterance that just started playing.
    fn show_spoken(&self, _text: &str) {}
}

pub struct TapTrigger {
    tx: oneshot::Sender<()>,
}

impl TapTrigger {
    pub fn tap(self) {
        let _ = self.tx.send(());
    }
}

pub struct TapPrompt {
    rx: oneshot::Receiver<()>,
}

impl TapPrompt {
    pub fn channel() -> (TapTrigger, TapPrompt) {
        let (tx, rx) = oneshot::channel();
        (TapTrigger { tx }, TapPrompt { rx })
    }

    /// Resolves to `true` on a tap and `false` when the trigger was dropped.
    pub async fn tapped(self) -> bool {
        self.rx.await.is_ok()
    }
}
