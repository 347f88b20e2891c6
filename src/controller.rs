use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{AudioCaptureSession, CaptureOutcome, RejectReason};
use crate::context::AssistantContext;
use crate::playback::{
    AudioUnlockManager, PlaybackQueue, QueueEvent, Speaker, TextOnlyPlayer, UtterancePlayer,
};
use crate::types::ConversationState;
use crate::ui::{status, ConversationUi};

mod turn;

use turn::{Turn, TurnEvent, TurnInput};

/// Input gestures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Press,
    Release,
    /// Pointer left the talk control; ends a recording like a release.
    Leave,
    /// A typed question.
    Ask(String),
}

pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConversationState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    pub fn press(&self) {
        self.send(Command::Press);
    }

    pub fn release(&self) {
        self.send(Command::Release);
    }

    pub fn leave(&self) {
        self.send(Command::Leave);
    }

    pub fn ask(&self, question: &str) {
        self.send(Command::Ask(question.to_string()));
    }

    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("controller has stopped");
        }
    }

    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    /// Cancels everything in flight and waits for the controller to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("controller task failed: {}", e);
        }
    }
}

/// Owns the conversation state machine. Runs as one task; gestures, queue
/// events and turn results are handled in arrival order.
pub struct ConversationController {
    ctx: AssistantContext,
    ui: Arc<dyn ConversationUi>,
    state: ConversationState,
    state_tx: watch::Sender<ConversationState>,
    capture: AudioCaptureSession,
    unlock: Arc<AudioUnlockManager>,
    queue: PlaybackQueue,
    queue_busy: bool,
    turn_active: bool,
    welcomed: bool,
    turns: mpsc::UnboundedSender<TurnEvent>,
    cancel: CancellationToken,
}

impl ConversationController {
    pub fn spawn(ctx: AssistantContext) -> ControllerHandle {
        let cancel = CancellationToken::new();
        let ui = ctx.ui().clone();
        let (state_tx, state_rx) = watch::channel(ConversationState::Idle);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();

        let unlock = Arc::new(AudioUnlockManager::new(
            ctx.output().clone(),
            ui.clone(),
            ctx.config().tap_prompt_timeout(),
        ));
        let player: Arc<dyn UtterancePlayer> = match ctx.services() {
            Some(services) => {
                let synthesizer = services.synthesizer().clone();
                Arc::new(Speaker::new(synthesizer, unlock.clone(), ui.clone()))
            }
            None => Arc::new(TextOnlyPlayer::new(ui.clone())),
        };
        let queue = PlaybackQueue::spawn(player, queue_tx, cancel.child_token());

        let controller = Self {
            capture: AudioCaptureSession::new(ctx.microphone().clone()),
            ctx,
            ui,
            state: ConversationState::Idle,
            state_tx,
            unlock,
            queue,
            queue_busy: false,
            turn_active: false,
            welcomed: false,
            turns: turn_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(controller.run(command_rx, queue_rx, turn_rx));

        ControllerHandle {
            commands: command_tx,
            state: state_rx,
            cancel,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut queue_events: mpsc::UnboundedReceiver<QueueEvent>,
        mut turn_events: mpsc::UnboundedReceiver<TurnEvent>,
    ) {
        self.check_health();
        self.ui.set_status(status::READY);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = queue_events.recv() => self.on_queue_event(event),
                Some(event) = turn_events.recv() => self.on_turn_event(event),
            }
        }

        self.capture.abort();
        self.cancel.cancel();
        tracing::info!("conversation controller stopped");
    }

    fn check_health(&self) {
        let Some(services) = self.ctx.services() else {
            return;
        };
        let answers = services.answers().clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let health = tokio::select! {
                _ = cancel.cancelled() => return,
                health = answers.health() => health,
            };
            match health {
                Ok(health) if health.model_configured() == Some(false) => {
                    tracing::warn!("answer backend reports no language model configured")
                }
                Ok(health) => {
                    tracing::info!("answer backend is {}", health.status().unwrap_or("reachable"))
                }
                Err(e) => tracing::warn!("answer backend health check failed: {}", e),
            }
        });
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Press => self.on_press().await,
            Command::Release | Command::Leave => self.on_release(),
            Command::Ask(question) => self.on_ask(question).await,
        }
    }

    fn can_start_turn(&self) -> bool {
        self.state == ConversationState::Idle && !self.queue_busy && !self.turn_active
    }

    async fn on_press(&mut self) {
        if !self.can_start_turn() {
            tracing::debug!("ignoring press while {}", self.state);
            return;
        }
        self.unlock.unlock().await;

        if !self.welcomed {
            self.welcomed = true;
            if let Some(welcome) = self.ctx.config().welcome_message().map(str::to_owned) {
                self.ui.set_status(status::PLAYING_WELCOME);
                self.queue_busy = true;
                self.queue.enqueue(&welcome);
                return;
            }
        }

        match self.capture.start().await {
            Ok(()) => {
                self.transition(ConversationState::Listening);
                self.ui.set_status(status::LISTENING);
            }
            Err(e) => {
                tracing::warn!("failed to start recording: {}", e);
                self.ui.set_status(status::MICROPHONE_ERROR);
                self.ui.show_text(&e.user_message());
            }
        }
    }

    fn on_release(&mut self) {
        if self.state != ConversationState::Listening {
            return;
        }
        self.transition(ConversationState::Thinking);

        match self.capture.stop() {
            Ok(CaptureOutcome::Accepted(audio)) => {
                self.ui.set_status(status::PROCESSING_QUESTION);
                self.spawn_turn(TurnInput::Recording(audio));
            }
            Ok(CaptureOutcome::Rejected(reason)) => {
                tracing::info!("recording rejected: {}", reason);
                self.ui.set_status(match reason {
                    RejectReason::TooShort { .. } => status::RECORDING_TOO_SHORT,
                    RejectReason::Empty { .. } => status::NO_AUDIO_CAPTURED,
                });
                self.transition(ConversationState::Idle);
            }
            Err(e) => {
                tracing::warn!("failed to finish recording: {}", e);
                self.ui.show_text(&e.user_message());
                self.transition(ConversationState::Idle);
            }
        }
    }

    async fn on_ask(&mut self, question: String) {
        let question = question.trim();
        if question.is_empty() {
            return;
        }
        if !self.can_start_turn() {
            tracing::debug!("ignoring question while {}", self.state);
            return;
        }
        self.unlock.unlock().await;
        self.transition(ConversationState::Thinking);
        self.ui.set_status(status::SEARCHING_KNOWLEDGE);
        self.spawn_turn(TurnInput::Question(question.to_string()));
    }

    fn spawn_turn(&mut self, input: TurnInput) {
        self.turn_active = true;
        let turn = Turn {
            services: self.ctx.services().cloned(),
            ui: self.ui.clone(),
            token_threshold: self.ctx.config().token_threshold(),
            cancel: self.cancel.child_token(),
            events: self.turns.clone(),
        };
        tokio::spawn(turn.run(input));
    }

    fn on_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::SpeakEarly { text, stream } => {
                self.queue_busy = true;
                self.queue.enqueue_streaming(text, stream);
            }
            TurnEvent::Speak { text } => {
                self.queue_busy = true;
                self.queue.enqueue(&text);
            }
            TurnEvent::Failed { message } => {
                self.ui.show_text(&message);
                self.transition(ConversationState::Idle);
            }
            TurnEvent::Done => {
                self.turn_active = false;
                if self.state.is_busy() && self.settle_if_quiet() {
                    self.ui.set_status(status::READY);
                }
            }
        }
    }

    fn on_queue_event(&mut self, event: QueueEvent) {
        match event {
            QueueEvent::Started(utterance) => {
                self.ui.show_spoken(utterance.text());
                if self.state != ConversationState::Listening {
                    self.transition(ConversationState::Speaking);
                }
            }
            QueueEvent::Finished(utterance) => {
                tracing::debug!("utterance #{} finished", utterance.sequence());
            }
            QueueEvent::Drained => {
                self.queue_busy = false;
                if self.settle_if_quiet() {
                    self.ui.set_status(status::READY);
                }
            }
        }
    }

    /// Returns to idle once nothing is playing and no turn can add more.
    fn settle_if_quiet(&mut self) -> bool {
        if self.queue_busy || self.turn_active {
            return false;
        }
        if self.state.is_busy() {
            self.transition(ConversationState::Idle);
        }
        true
    }

    fn transition(&mut self, next: ConversationState) {
        if self.state == next {
            return;
        }
        tracing::info!("conversation state {} -> {}", self.state, next);
        self.state = next;
        self.ui.set_state(next);
        self.state_tx.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use secrecy::SecretString;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::answer::{AnswerError, AnswerStreamEvent};
    use crate::config::Config;
    use crate::consts::{APOLOGY_ANSWER, DEMO_MODE_ANSWER};
    use crate::context::VoiceServices;
    use crate::synthesis::SpeechSynthesizer;
    use crate::test_support::{
        settle, wait_until, FakeAnswers, FakeBatch, FakeMicrophone, FakeOutput, FakeStreaming,
        GatedTranscriber, RecordingUi, TapBehavior,
    };
    use crate::transcription::{MockTranscriber, Transcriber, TranscriptionClient};
    use ConversationState::{Idle, Listening, Speaking, Thinking};

    struct Harness {
        handle: ControllerHandle,
        ui: Arc<RecordingUi>,
        microphone: Arc<FakeMicrophone>,
        answers: Arc<FakeAnswers>,
        streaming: Arc<FakeStreaming>,
    }

    fn harness(
        config: Config,
        transcriber: Option<Arc<dyn Transcriber>>,
        answers: FakeAnswers,
    ) -> Harness {
        harness_with(config, transcriber, answers, FakeStreaming::working())
    }

    fn harness_with(
        config: Config,
        transcriber: Option<Arc<dyn Transcriber>>,
        answers: FakeAnswers,
        streaming: FakeStreaming,
    ) -> Harness {
        let ui = Arc::new(RecordingUi::new(TapBehavior::Ignore));
        let microphone = Arc::new(FakeMicrophone::with_chunks(vec![vec![3u8; 512]; 4]));
        let answers = Arc::new(answers);
        let streaming = Arc::new(streaming);

        let mut builder = AssistantContext::builder(config, ui.clone())
            .with_microphone(microphone.clone())
            .with_output(Arc::new(FakeOutput::unlocked()));
        if let Some(transcriber) = transcriber {
            let synthesizer =
                SpeechSynthesizer::new(streaming.clone(), Arc::new(FakeBatch::working()));
            let services = VoiceServices::new(transcriber, answers.clone(), synthesizer);
            builder = builder.with_services(services);
        }
        let handle = ConversationController::spawn(builder.build());
        Harness {
            handle,
            ui,
            microphone,
            answers,
            streaming,
        }
    }

    fn no_welcome() -> Config {
        Config::builder().without_welcome_message().build()
    }

    fn transcribing(text: &'static str) -> Arc<dyn Transcriber> {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(move |_| Ok(text.to_string()));
        Arc::new(transcriber)
    }

    fn tokens(tokens: &[&str], final_text: &str) -> Vec<AnswerStreamEvent> {
        let mut events: Vec<AnswerStreamEvent> =
            tokens.iter().map(|t| AnswerStreamEvent::Token(t.to_string())).collect();
        events.push(AnswerStreamEvent::Complete(final_text.to_string()));
        events
    }

    /// Press, hold for `held`, release.
    async fn speak_for(h: &Harness, held: Duration) {
        h.handle.press();
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Listening)).await;
        tokio::time::sleep(held).await;
        h.handle.release();
    }

    #[tokio::test(start_paused = true)]
    async fn welcome_then_voice_question_end_to_end() {
        let answer = "I have five years of experience.";
        let h = harness(
            Config::new(),
            Some(transcribing("What is your experience?")),
            FakeAnswers::scripted(tokens(&["I", " have", " five", " years", " of"], answer)),
        );
        assert_eq!(h.handle.state(), Idle);

        h.handle.press();
        let ui = h.ui.clone();
        wait_until(move || ui.states() == vec![Speaking, Idle]).await;
        assert_eq!(h.microphone.opened.load(Ordering::SeqCst), 0);
        assert_eq!(h.ui.spoken(), vec![crate::consts::DEFAULT_WELCOME_MESSAGE.to_string()]);
        h.ui.clear();

        speak_for(&h, Duration::from_secs(1)).await;
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;
        settle().await;

        assert_eq!(h.ui.states(), vec![Listening, Thinking, Speaking, Idle]);
        assert_eq!(h.ui.spoken(), vec![answer.to_string()]);
        assert_eq!(h.answers.questions(), vec!["What is your experience?".to_string()]);
        assert_eq!(h.streaming.opened.load(Ordering::SeqCst), 2);
        assert_eq!(h.streaming.flushed_texts().last(), Some(&answer.to_string()));
        assert_eq!(h.handle.state(), Idle);
        assert_eq!(h.ui.statuses().last(), Some(&status::READY.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn press_while_thinking_is_ignored() {
        let transcriber = Arc::new(GatedTranscriber::new("Where do you work?"));
        let h = harness(
            no_welcome(),
            Some(transcriber.clone()),
            FakeAnswers::scripted(tokens(&["At"], "At home.")),
        );

        speak_for(&h, Duration::from_secs(1)).await;
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Thinking)).await;

        h.handle.press();
        settle().await;
        assert_eq!(h.handle.state(), Thinking);
        assert_eq!(h.microphone.opened.load(Ordering::SeqCst), 1);

        transcriber.open();
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;
        assert_eq!(h.ui.states(), vec![Listening, Thinking, Speaking, Idle]);
        assert_eq!(h.microphone.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transcription_failure_returns_to_idle_without_asking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let transcriber = TranscriptionClient::new(
            reqwest::Client::new(),
            &server.uri(),
            SecretString::from("key".to_string()),
            "scribe_v1",
        );
        let h = harness(no_welcome(), Some(Arc::new(transcriber)), FakeAnswers::scripted(vec![]));

        speak_for(&h, Duration::from_millis(600)).await;
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;

        assert_eq!(h.ui.states(), vec![Listening, Thinking, Idle]);
        let texts = h.ui.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Voice service unavailable"), "{}", texts[0]);
        assert!(texts[0].ends_with("Please try the text chat instead."));
        assert_eq!(h.answers.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_recording_returns_to_idle() {
        let transcriber = Arc::new(MockTranscriber::new());
        let h = harness(no_welcome(), Some(transcriber), FakeAnswers::scripted(vec![]));

        speak_for(&h, Duration::from_millis(100)).await;
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;

        assert_eq!(h.ui.states(), vec![Listening, Thinking, Idle]);
        assert!(h.ui.statuses().contains(&status::RECORDING_TOO_SHORT.to_string()));
        assert_eq!(h.microphone.released.load(Ordering::SeqCst), 1);
        assert_eq!(h.answers.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_failure_speaks_an_apology() {
        let h = harness(
            no_welcome(),
            Some(transcribing("Tell me about your projects")),
            FakeAnswers::scripted(vec![
                AnswerStreamEvent::Token("I built".into()),
                AnswerStreamEvent::Error(AnswerError::Network("reset".into())),
            ]),
        );

        speak_for(&h, Duration::from_secs(1)).await;
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;

        assert_eq!(h.ui.spoken(), vec![APOLOGY_ANSWER.to_string()]);
        assert_eq!(h.ui.states(), vec![Listening, Thinking, Speaking, Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn diverging_final_text_is_synthesized_afresh() {
        let h = harness(
            no_welcome(),
            Some(transcribing("What do you do?")),
            FakeAnswers::scripted(tokens(
                &["I", " write", " code", " for", " a"],
                "I am a software engineer.",
            )),
        );

        speak_for(&h, Duration::from_secs(1)).await;
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;

        assert_eq!(h.ui.states(), vec![Listening, Thinking, Speaking, Idle]);
        assert_eq!(h.ui.spoken(), vec!["I am a software engineer.".to_string()]);
        assert_eq!(h.streaming.opened.load(Ordering::SeqCst), 2);
        assert_eq!(h.streaming.closed.load(Ordering::SeqCst), 1);
        assert_eq!(h.streaming.flushed_texts(), vec!["I am a software engineer.".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_starts_before_the_answer_completes() {
        let answer: Vec<AnswerStreamEvent> = ["I", " have", " five", " years", " of", " experience"]
            .iter()
            .map(|t| AnswerStreamEvent::Token(t.to_string()))
            .collect();
        let h = harness_with(
            no_welcome(),
            Some(Arc::new(MockTranscriber::new())),
            FakeAnswers::open_ended(answer),
            FakeStreaming::eager(),
        );

        h.handle.ask("What is your experience?");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.ui.states(), vec![Thinking, Speaking]);
        assert_eq!(h.handle.state(), Speaking);
        let spoken = h.ui.spoken();
        assert_eq!(spoken.len(), 1);
        assert!(spoken[0].starts_with("I have five years of"), "{}", spoken[0]);
        assert!(h.streaming.flushed_texts().is_empty());
        assert_eq!(h.streaming.opened.load(Ordering::SeqCst), 1);

        h.handle.press();
        settle().await;
        assert_eq!(h.handle.state(), Speaking);
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn typed_question_follows_the_answer_path() {
        let h = harness(
            no_welcome(),
            Some(Arc::new(MockTranscriber::new())),
            FakeAnswers::scripted(tokens(&["Lisbon"], "In Lisbon.")),
        );

        h.handle.ask("  Where did you study?  ");
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;

        assert_eq!(h.answers.questions(), vec!["Where did you study?".to_string()]);
        assert_eq!(h.ui.states(), vec![Thinking, Speaking, Idle]);
        assert_eq!(h.ui.spoken(), vec!["In Lisbon.".to_string()]);
        assert_eq!(h.microphone.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn demo_mode_shows_placeholder() {
        let h = harness(no_welcome(), None, FakeAnswers::scripted(vec![]));

        speak_for(&h, Duration::from_secs(1)).await;
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Idle)).await;

        assert_eq!(h.ui.states(), vec![Listening, Thinking, Idle]);
        assert_eq!(h.ui.texts(), vec![DEMO_MODE_ANSWER.to_string()]);
        assert!(h.ui.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_the_control_ends_the_recording() {
        let h = harness(
            no_welcome(),
            Some(transcribing("Hi")),
            FakeAnswers::scripted(tokens(&["Hello"], "Hello.")),
        );
        let mut states = h.handle.subscribe();

        h.handle.press();
        states.wait_for(|state| *state == Listening).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle.leave();
        states.wait_for(|state| *state == Idle).await.unwrap();

        assert_eq!(h.ui.states(), vec![Listening, Thinking, Speaking, Idle]);
        assert_eq!(h.microphone.released.load(Ordering::SeqCst), 1);
        assert_eq!(h.ui.spoken(), vec!["Hello.".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_an_open_recording() {
        let transcriber = Arc::new(MockTranscriber::new());
        let h = harness(no_welcome(), Some(transcriber), FakeAnswers::scripted(vec![]));

        h.handle.press();
        let ui = h.ui.clone();
        wait_until(move || ui.states().last() == Some(&Listening)).await;
        let microphone = h.microphone.clone();
        h.handle.shutdown().await;

        assert_eq!(microphone.released.load(Ordering::SeqCst), 1);
    }
}
