use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::answer::AnswerStreamEvent;
use crate::capture::RecordedAudio;
use crate::consts::{APOLOGY_ANSWER, DEMO_MODE_ANSWER, EMPTY_ANSWER};
use crate::context::VoiceServices;
use crate::playback::{SpokenText, SpokenTextWriter};
use crate::synthesis::{SynthesisError, SynthesisInput, SynthesisOutput};
use crate::ui::{status, ConversationUi};

pub(crate) enum TurnInput {
    Recording(RecordedAudio),
    Question(String),
}

pub(crate) enum TurnEvent {
    /// Speech started before the answer was complete. `text` grows with the
    /// answer and settles when it completes.
    SpeakEarly { text: SpokenText, stream: SynthesisOutput },
    /// The answer to speak.
    Speak { text: String },
    /// The turn ended without an answer.
    Failed { message: String },
    /// Nothing more will come from this turn.
    Done,
}

/// One question/answer exchange, run off the controller task.
pub(crate) struct Turn {
    pub(crate) services: Option<VoiceServices>,
    pub(crate) ui: Arc<dyn ConversationUi>,
    pub(crate) token_threshold: usize,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: mpsc::UnboundedSender<TurnEvent>,
}

impl Turn {
    pub(crate) async fn run(self, input: TurnInput) {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => tracing::debug!("turn cancelled"),
            _ = self.execute(input) => {}
        }
        self.emit(TurnEvent::Done);
    }

    async fn execute(&self, input: TurnInput) {
        let Some(services) = self.services.as_ref() else {
            tracing::info!("demo mode, answering with a placeholder");
            self.emit(TurnEvent::Speak {
                text: DEMO_MODE_ANSWER.to_string(),
            });
            return;
        };

        let question = match input {
            TurnInput::Question(question) => question,
            TurnInput::Recording(audio) => {
                self.ui.set_status(status::PROCESSING_QUESTION);
                match services.transcriber().transcribe(&audio).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("transcription failed: {}", e);
                        self.ui.set_status(status::VOICE_NOT_AVAILABLE);
                        let message = format!(
                            "Voice service unavailable: {e}. Please try the text chat instead."
                        );
                        self.emit(TurnEvent::Failed { message });
                        return;
                    }
                }
            }
        };

        self.ui.show_transcript(&question);
        self.ui.set_status(status::SEARCHING_KNOWLEDGE);
        self.answer(services, &question).await;
    }

    /// Reads the answer stream. Once enough tokens have arrived speech starts
    /// on a synthesis stream fed as tokens come in. The final text is
    /// authoritative: when it does not extend what was streamed, the early
    /// speech is cut off and the final text is spoken afresh.
    async fn answer(&self, services: &VoiceServices, question: &str) {
        let mut answer = services.answers().ask(question, &self.cancel);
        let mut accumulated = String::new();
        let mut tokens = 0usize;
        let mut early: Option<EarlySpeech> = None;
        let mut early_attempted = false;

        while let Some(event) = answer.next_event().await {
            match event {
                AnswerStreamEvent::Token(token) => {
                    accumulated.push_str(&token);
                    tokens += 1;
                    self.ui.show_answer(&accumulated);

                    if let Some(speech) = early.as_mut() {
                        if let Err(e) = speech.push(&token, &accumulated).await {
                            tracing::warn!("early synthesis failed, waiting for the answer: {}", e);
                            early = None;
                        }
                    } else if !early_attempted && tokens >= self.token_threshold {
                        early_attempted = true;
                        early = self.start_early(services, &accumulated).await;
                    } else if !early_attempted {
                        self.ui.set_status(status::RAG_THINKING);
                    }
                }
                AnswerStreamEvent::Complete(text) => {
                    let text = if text.trim().is_empty() {
                        EMPTY_ANSWER.to_string()
                    } else {
                        text
                    };
                    let spoken = match early.take() {
                        Some(speech) => speech.finish(&text).await,
                        None => false,
                    };
                    if !spoken {
                        self.emit(TurnEvent::Speak { text });
                    }
                    return;
                }
                AnswerStreamEvent::Error(e) => {
                    tracing::warn!("answer stream failed: {}", e);
                    return self.apologize(early).await;
                }
            }
        }
        tracing::warn!("answer stream ended without a final event");
        self.apologize(early).await
    }

    async fn apologize(&self, early: Option<EarlySpeech>) {
        if let Some(speech) = early {
            speech.discard().await;
        }
        self.emit(TurnEvent::Speak {
            text: APOLOGY_ANSWER.to_string(),
        });
    }

    async fn start_early(
        &self,
        services: &VoiceServices,
        accumulated: &str,
    ) -> Option<EarlySpeech> {
        let stream = match services.synthesizer().open_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("early synthesis unavailable, waiting for the full answer: {}", e);
                return None;
            }
        };
        let (mut input, output) = stream.split();
        if let Err(e) = input.send_text(accumulated).await {
            tracing::warn!("early synthesis failed: {}", e);
            return None;
        }
        tracing::debug!("early synthesis started");
        let (writer, text) = SpokenText::channel(accumulated);
        self.emit(TurnEvent::SpeakEarly { text, stream: output });
        self.ui.set_status(status::SPEAKING);
        Some(EarlySpeech { input, text: writer })
    }

    fn emit(&self, event: TurnEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("controller is gone, dropping turn result");
        }
    }
}

/// The text side of speech that started before the answer was complete.
/// Dropping it discards whatever was not yet played.
struct EarlySpeech {
    input: SynthesisInput,
    text: SpokenTextWriter,
}

impl EarlySpeech {
    async fn push(&mut self, token: &str, accumulated: &str) -> Result<(), SynthesisError> {
        self.input.send_text(token).await?;
        self.text.update(accumulated);
        Ok(())
    }

    /// Sends whatever the final text adds and flushes. Returns `false` when
    /// the final text does not extend the streamed text or the stream failed;
    /// the early speech is then closed and the caller speaks `text` itself.
    async fn finish(mut self, text: &str) -> bool {
        let Some(rest) = text.strip_prefix(self.input.sent_text()).map(str::to_owned) else {
            tracing::debug!("final answer differs from streamed text, synthesizing it afresh");
            self.discard().await;
            return false;
        };
        self.text.update(text);
        let sent = match self.input.send_text(&rest).await {
            Ok(()) => self.input.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!("failed to finish early synthesis: {}", e);
            self.discard().await;
            return false;
        }
        self.text.settle(text);
        true
    }

    async fn discard(mut self) {
        if let Err(e) = self.input.close().await {
            tracing::debug!("early synthesis already closed: {}", e);
        }
    }
}
