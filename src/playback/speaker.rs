use std::sync::Arc;

use async_trait::async_trait;

use crate::playback::{
    AudioUnlockManager, PlaybackCompletion, PlaybackStart, QueuedUtterance, SpokenText,
    UtterancePlayer,
};
use crate::synthesis::{SpeechAudio, SpeechSynthesizer, SynthesisError, SynthesisOutput};
use crate::types::Utterance;
use crate::ui::{status, ConversationUi};

/// Synthesizes an utterance and hands the audio to the unlock manager.
pub struct Speaker {
    synthesizer: SpeechSynthesizer,
    unlock: Arc<AudioUnlockManager>,
    ui: Arc<dyn ConversationUi>,
}

impl Speaker {
    pub fn new(
        synthesizer: SpeechSynthesizer,
        unlock: Arc<AudioUnlockManager>,
        ui: Arc<dyn ConversationUi>,
    ) -> Self {
        Self { synthesizer, unlock, ui }
    }

    async fn synthesize(&self, utterance: &Utterance) -> Option<SpeechAudio> {
        self.ui.set_status(status::CREATING_SPEECH);
        match self.synthesizer.speak(utterance.text()).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                self.unavailable(utterance, utterance.text(), e);
                None
            }
        }
    }

    /// Waits for the first audio of a stream opened while the answer was
    /// still arriving. A stream that ends before producing any falls back
    /// to batch synthesis of the settled text.
    async fn continue_stream(
        &self,
        utterance: &Utterance,
        stream: SynthesisOutput,
        text: &SpokenText,
    ) -> Option<SpeechAudio> {
        let sequence = utterance.sequence();
        match stream.into_audio().await {
            Ok(audio) => return Some(audio),
            Err(e) => {
                tracing::debug!("early synthesis for utterance #{} gave no audio: {}", sequence, e)
            }
        }
        let Some(text) = text.clone().settled().await else {
            tracing::debug!("utterance #{} was replaced before it was spoken", sequence);
            return None;
        };
        self.ui.set_status(status::CREATING_SPEECH);
        match self.synthesizer.batch(&text).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                self.unavailable(utterance, &text, e);
                None
            }
        }
    }

    fn unavailable(&self, utterance: &Utterance, text: &str, e: SynthesisError) {
        tracing::warn!("speech unavailable for utterance #{}: {}", utterance.sequence(), e);
        self.ui.set_status(status::VOICE_NOT_AVAILABLE);
        self.ui.show_text(text);
    }
}

#[async_trait]
impl UtterancePlayer for Speaker {
    async fn start(&self, item: QueuedUtterance) -> Option<PlaybackCompletion> {
        let (utterance, text, stream) = item.into_parts();
        let audio = match stream {
            Some(stream) => self.continue_stream(&utterance, stream, &text).await?,
            None => self.synthesize(&utterance).await?,
        };
        tracing::debug!(
            "utterance #{} ready, {:?} of audio up front",
            utterance.sequence(),
            audio.head().duration()
        );

        match self.unlock.start(audio, &text).await {
            PlaybackStart::Playing(completion) => {
                self.ui.set_status(status::ANSWERING);
                Some(completion)
            }
            PlaybackStart::TextFallback => None,
        }
    }
}

/// Used without voice services: every utterance is shown as text.
pub struct TextOnlyPlayer {
    ui: Arc<dyn ConversationUi>,
}

impl TextOnlyPlayer {
    pub fn new(ui: Arc<dyn ConversationUi>) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl UtterancePlayer for TextOnlyPlayer {
    async fn start(&self, item: QueuedUtterance) -> Option<PlaybackCompletion> {
        self.ui.show_text(item.utterance().text());
        None
    }
}
