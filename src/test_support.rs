//! In-process stand-ins for devices, providers and the UI.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::answer::{AnswerError, AnswerSource, AnswerStream, AnswerStreamEvent};
use crate::capture::{CaptureError, CaptureFormat, CaptureStream, Microphone, RecordedAudio};
use crate::playback::{
    AudioOutput, OutputHandle, PlaybackAttemptResult, PlaybackCompletion, PlaybackError,
    QueuedUtterance, UtterancePlayer,
};
use crate::synthesis::{
    AudioClip, BatchSynthesizer, SpeechAudio, StreamCommand, StreamingSynthesizer, SynthesisError,
    SynthesisFrame, SynthesisStream,
};
use crate::transcription::{Transcriber, TranscriptionError};
use crate::types::{ConversationState, HealthStatus};
use crate::ui::{ConversationUi, TapPrompt, TapTrigger};
use crate::utils::audio::SYNTHESIS_PCM16_SAMPLE_RATE;

/// Polls `condition` until it holds. Panics after ten seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition was never reached");
}

/// Lets spawned tasks run to their next wait point.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub enum TapBehavior {
    /// Leaves the prompt open until it times out.
    Ignore,
    Decline,
    /// Unlocks the output, then taps.
    TapAndUnlock(Arc<FakeOutput>),
}

pub struct RecordingUi {
    behavior: TapBehavior,
    states: Mutex<Vec<ConversationState>>,
    statuses: Mutex<Vec<String>>,
    texts: Mutex<Vec<String>>,
    spoken: Mutex<Vec<String>>,
    tap_prompts: AtomicUsize,
    pending_taps: Mutex<Vec<TapTrigger>>,
}

impl RecordingUi {
    pub fn new(behavior: TapBehavior) -> Self {
        Self {
            behavior,
            states: Mutex::default(),
            statuses: Mutex::default(),
            texts: Mutex::default(),
            spoken: Mutex::default(),
            tap_prompts: AtomicUsize::new(0),
            pending_taps: Mutex::default(),
        }
    }

    pub fn states(&self) -> Vec<ConversationState> {
        self.states.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn tap_prompts(&self) -> usize {
        self.tap_prompts.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.states.lock().unwrap().clear();
        self.statuses.lock().unwrap().clear();
        self.texts.lock().unwrap().clear();
        self.spoken.lock().unwrap().clear();
        self.tap_prompts.store(0, Ordering::SeqCst);
    }
}

impl ConversationUi for RecordingUi {
    fn set_state(&self, state: ConversationState) {
        self.states.lock().unwrap().push(state);
    }

    fn set_status(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }

    fn show_text(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_string());
    }

    fn show_tap_prompt(&self) -> TapPrompt {
        self.tap_prompts.fetch_add(1, Ordering::SeqCst);
        let (trigger, prompt) = TapPrompt::channel();
        match &self.behavior {
            TapBehavior::Ignore => self.pending_taps.lock().unwrap().push(trigger),
            TapBehavior::Decline => drop(trigger),
            TapBehavior::TapAndUnlock(output) => {
                output.unlock_all();
                trigger.tap();
            }
        }
        prompt
    }

    fn dismiss_tap_prompt(&self) {}

    fn show_spoken(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }
}

/// Hands out a stream preloaded with `chunks`.
pub struct FakeMicrophone {
    chunks: Vec<Vec<u8>>,
    error: Option<CaptureError>,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            error: None,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(error: CaptureError) -> Self {
        Self {
            error: Some(error),
            ..Self::with_chunks(Vec::new())
        }
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self) -> Result<CaptureStream, CaptureError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in &self.chunks {
            let _ = tx.send(chunk.clone());
        }
        let released = self.released.clone();
        Ok(CaptureStream::new(
            CaptureFormat::Encoded {
                mime_type: "audio/webm;codecs=opus".to_string(),
            },
            rx,
            move || {
                released.fetch_add(1, Ordering::SeqCst);
            },
        ))
    }
}

/// An output that refuses fresh handles while locked. Handles opened while
/// unlocked keep working after a later lock unless every handle is locked.
pub struct FakeOutput {
    locked: Arc<AtomicBool>,
    revoked: Arc<AtomicBool>,
    played: Arc<AtomicUsize>,
    blocked: Arc<AtomicUsize>,
    pub resumes: AtomicUsize,
}

impl FakeOutput {
    pub fn locked() -> Self {
        Self {
            locked: Arc::new(AtomicBool::new(true)),
            revoked: Arc::new(AtomicBool::new(false)),
            played: Arc::new(AtomicUsize::new(0)),
            blocked: Arc::new(AtomicUsize::new(0)),
            resumes: AtomicUsize::new(0),
        }
    }

    pub fn unlocked() -> Self {
        let output = Self::locked();
        output.unlock_all();
        output
    }

    pub fn lock_fresh_handles(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    /// Locks fresh handles and the ones already open.
    pub fn lock_all_handles(&self) {
        self.locked.store(true, Ordering::SeqCst);
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn unlock_all(&self) {
        self.locked.store(false, Ordering::SeqCst);
        self.revoked.store(false, Ordering::SeqCst);
    }

    /// Clips that actually started, unlock clips included.
    pub fn played(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }

    /// Play attempts refused by any handle.
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn resume(&self) -> Result<(), PlaybackError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        if self.locked.load(Ordering::SeqCst) {
            return Err(PlaybackError::Blocked("no user gesture yet".into()));
        }
        Ok(())
    }

    async fn open(&self) -> Result<Box<dyn OutputHandle>, PlaybackError> {
        Ok(Box::new(FakeHandle {
            allowed: !self.locked.load(Ordering::SeqCst),
            revoked: self.revoked.clone(),
            played: self.played.clone(),
            blocked: self.blocked.clone(),
        }))
    }
}

/// Plays in real (or paused) time: the head, then each streamed chunk.
pub struct FakeHandle {
    allowed: bool,
    revoked: Arc<AtomicBool>,
    played: Arc<AtomicUsize>,
    blocked: Arc<AtomicUsize>,
}

#[async_trait]
impl OutputHandle for FakeHandle {
    async fn play(&mut self, audio: &mut SpeechAudio) -> PlaybackAttemptResult {
        if !self.allowed || self.revoked.load(Ordering::SeqCst) {
            self.blocked.fetch_add(1, Ordering::SeqCst);
            return PlaybackAttemptResult::Blocked("no user gesture yet".into());
        }
        self.played.fetch_add(1, Ordering::SeqCst);
        let (done, completion) = PlaybackCompletion::channel();
        let length = audio.head().duration();
        let mut tail = audio.take_tail();
        tokio::spawn(async move {
            tokio::time::sleep(length).await;
            let mut result = Ok(());
            if let Some(tail) = tail.as_mut() {
                while let Some(chunk) = tail.next_chunk().await {
                    match chunk {
                        Ok(chunk) => tokio::time::sleep(chunk.duration()).await,
                        Err(_) => {
                            result = Err(PlaybackError::Interrupted);
                            break;
                        }
                    }
                }
            }
            let _ = done.send(result);
        });
        PlaybackAttemptResult::Played(completion)
    }
}

/// Answers every flush with a tenth of a second of audio. An eager stream
/// also answers every piece of text with a second of audio as it arrives.
pub struct FakeStreaming {
    refuse: bool,
    audible: bool,
    eager: bool,
    flushed: Arc<Mutex<Vec<String>>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
}

impl FakeStreaming {
    pub fn working() -> Self {
        Self {
            refuse: false,
            audible: true,
            eager: false,
            flushed: Arc::default(),
            opened: AtomicUsize::new(0),
            closed: Arc::default(),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::working()
        }
    }

    /// Completes streams without producing any audio.
    pub fn silent() -> Self {
        Self {
            audible: false,
            ..Self::working()
        }
    }

    pub fn eager() -> Self {
        Self {
            eager: true,
            ..Self::working()
        }
    }

    /// Full text of each stream that was flushed, in flush order.
    pub fn flushed_texts(&self) -> Vec<String> {
        self.flushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamingSynthesizer for FakeStreaming {
    async fn open(&self) -> Result<SynthesisStream, SynthesisError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(SynthesisError::Connection("connection refused".into()));
        }
        let (command_tx, mut command_rx) = mpsc::channel(16);
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let flushed = self.flushed.clone();
        let closed = self.closed.clone();
        let (audible, eager) = (self.audible, self.eager);
        tokio::spawn(async move {
            let mut text = String::new();
            while let Some(command) = command_rx.recv().await {
                match command {
                    StreamCommand::Text(chunk) => {
                        text.push_str(&chunk);
                        if eager {
                            let second = vec![0.1; SYNTHESIS_PCM16_SAMPLE_RATE as usize];
                            let _ = frame_tx.send(Ok(SynthesisFrame::Audio(second))).await;
                        }
                    }
                    StreamCommand::Flush => {
                        flushed.lock().unwrap().push(text);
                        if audible && !eager {
                            let _ = frame_tx.send(Ok(SynthesisFrame::Audio(vec![0.1; 2205]))).await;
                        }
                        let _ = frame_tx.send(Ok(SynthesisFrame::Final)).await;
                        break;
                    }
                    StreamCommand::Close => {
                        closed.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });
        Ok(SynthesisStream::new(command_tx, frame_rx, SYNTHESIS_PCM16_SAMPLE_RATE))
    }
}

pub struct FakeBatch {
    fail: bool,
    texts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl FakeBatch {
    pub fn working() -> Self {
        Self {
            fail: false,
            texts: Mutex::default(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every request with a 500.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::working()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSynthesizer for FakeBatch {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(SynthesisError::ServiceUnavailable {
                status: 500,
                body: "internal error".into(),
            });
        }
        Ok(AudioClip::new(vec![0.2; 2205], SYNTHESIS_PCM16_SAMPLE_RATE))
    }
}

/// Replays the same events for every question.
pub struct FakeAnswers {
    script: Vec<AnswerStreamEvent>,
    hold_open: bool,
    held: Mutex<Vec<mpsc::Sender<AnswerStreamEvent>>>,
    questions: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl FakeAnswers {
    pub fn scripted(script: Vec<AnswerStreamEvent>) -> Self {
        Self {
            script,
            hold_open: false,
            held: Mutex::default(),
            questions: Mutex::default(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replays `script` and then keeps the stream open, as a service still
    /// generating would.
    pub fn open_ended(script: Vec<AnswerStreamEvent>) -> Self {
        Self {
            hold_open: true,
            ..Self::scripted(script)
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerSource for FakeAnswers {
    fn ask(&self, question: &str, cancel: &CancellationToken) -> AnswerStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.questions.lock().unwrap().push(question.to_string());
        let (tx, rx) = mpsc::channel(self.script.len() + 1);
        for event in &self.script {
            let _ = tx.try_send(event.clone());
        }
        if self.hold_open {
            self.held.lock().unwrap().push(tx);
        }
        AnswerStream::new(rx, cancel.child_token())
    }

    async fn health(&self) -> Result<HealthStatus, AnswerError> {
        Ok(HealthStatus::default())
    }
}

/// Holds every transcription until [`GatedTranscriber::open`] is called.
pub struct GatedTranscriber {
    text: String,
    gate: Notify,
}

impl GatedTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            gate: Notify::new(),
        }
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Transcriber for GatedTranscriber {
    async fn transcribe(&self, _audio: &RecordedAudio) -> Result<String, TranscriptionError> {
        self.gate.notified().await;
        Ok(self.text.clone())
    }
}

/// Plays every utterance for a fixed time, or stays silent.
pub struct ScriptedPlayer {
    length: Option<Duration>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    started: Mutex<Vec<String>>,
}

impl ScriptedPlayer {
    pub fn new(length: Duration) -> Self {
        Self {
            length: Some(length),
            active: Arc::default(),
            max_active: Arc::default(),
            started: Mutex::default(),
        }
    }

    pub fn silent() -> Self {
        Self {
            length: None,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn started_texts(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl UtterancePlayer for ScriptedPlayer {
    async fn start(&self, item: QueuedUtterance) -> Option<PlaybackCompletion> {
        self.started.lock().unwrap().push(item.utterance().text().to_string());
        let length = self.length?;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let (done, completion) = PlaybackCompletion::channel();
        let active = self.active.clone();
        tokio::spawn(async move {
            tokio::time::sleep(length).await;
            active.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(Ok(()));
        });
        Some(completion)
    }
}
