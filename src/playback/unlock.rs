use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::playback::{
    AudioOutput, OutputHandle, PlaybackAttemptResult, PlaybackCompletion, SpokenText,
};
use crate::synthesis::{AudioClip, SpeechAudio};
use crate::ui::{status, ConversationUi};
use crate::utils::audio::SYNTHESIS_PCM16_SAMPLE_RATE;

const UNLOCK_CLIP: Duration = Duration::from_millis(10);

pub enum PlaybackStart {
    /// Audio is playing; the completion resolves when it ends.
    Playing(PlaybackCompletion),
    /// Every strategy failed and the settled text was shown instead.
    TextFallback,
}

/// Tracks whether audio output has been unlocked by a user gesture and
/// starts audio through a ranked list of strategies:
///
/// 1. a fresh handle, when already unlocked
/// 2. a forced resume of the output, then a fresh handle
/// 3. the handle retained from the last unlock
/// 4. a tap prompt, falling back to text when it is never tapped
pub struct AudioUnlockManager {
    output: Arc<dyn AudioOutput>,
    ui: Arc<dyn ConversationUi>,
    unlocked: AtomicBool,
    retained: Mutex<Option<Box<dyn OutputHandle>>>,
    tap_timeout: Duration,
}

impl AudioUnlockManager {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        ui: Arc<dyn ConversationUi>,
        tap_timeout: Duration,
    ) -> Self {
        Self {
            output,
            ui,
            unlocked: AtomicBool::new(false),
            retained: Mutex::new(None),
            tap_timeout,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Called on every user gesture. Plays a short silent clip so the
    /// output is unlocked and keeps that handle for later reuse.
    pub async fn unlock(&self) -> bool {
        if self.is_unlocked() && self.retained.lock().await.is_some() {
            return true;
        }
        let mut handle = match self.output.open().await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!("audio unlock failed: {}", e);
                return false;
            }
        };
        let silence = AudioClip::silence(UNLOCK_CLIP, SYNTHESIS_PCM16_SAMPLE_RATE);
        let mut silence = SpeechAudio::whole(silence);
        match handle.play(&mut silence).await {
            PlaybackAttemptResult::Played(_) => {
                self.unlocked.store(true, Ordering::SeqCst);
                *self.retained.lock().await = Some(handle);
                tracing::debug!("audio unlocked");
                true
            }
            other => {
                tracing::debug!("audio unlock {}", other.describe());
                false
            }
        }
    }

    /// Starts `audio`, trying each strategy in turn. Only when all of them
    /// fail is the text shown, exactly once, after it has settled.
    pub async fn start(&self, mut audio: SpeechAudio, text: &SpokenText) -> PlaybackStart {
        if self.is_unlocked() {
            match self.play_fresh(&mut audio).await {
                PlaybackAttemptResult::Played(completion) => {
                    return PlaybackStart::Playing(completion);
                }
                other => {
                    tracing::debug!("direct playback {}, output is locked again", other.describe());
                    self.unlocked.store(false, Ordering::SeqCst);
                }
            }
        }

        match self.output.resume().await {
            Ok(()) => match self.play_fresh(&mut audio).await {
                PlaybackAttemptResult::Played(completion) => {
                    self.unlocked.store(true, Ordering::SeqCst);
                    return PlaybackStart::Playing(completion);
                }
                other => tracing::debug!("playback after forced unlock {}", other.describe()),
            },
            Err(e) => tracing::debug!("forced unlock failed: {}", e),
        }

        {
            let mut retained = self.retained.lock().await;
            if let Some(handle) = retained.as_mut() {
                match handle.play(&mut audio).await {
                    PlaybackAttemptResult::Played(completion) => {
                        return PlaybackStart::Playing(completion);
                    }
                    other => tracing::debug!("retained handle playback {}", other.describe()),
                }
            }
        }

        self.tap_to_play(audio, text).await
    }

    async fn play_fresh(&self, audio: &mut SpeechAudio) -> PlaybackAttemptResult {
        match self.output.open().await {
            Ok(mut handle) => {
                let result = handle.play(audio).await;
                if let PlaybackAttemptResult::Played(completion) = result {
                    return PlaybackAttemptResult::Played(hold_until_done(handle, completion));
                }
                result
            }
            Err(e) => PlaybackAttemptResult::Failed(e),
        }
    }

    async fn tap_to_play(&self, mut audio: SpeechAudio, text: &SpokenText) -> PlaybackStart {
        tracing::info!("audio is locked, asking for a tap");
        self.ui.set_status(status::TAP_FOR_AUDIO);
        let prompt = self.ui.show_tap_prompt();
        let tapped = tokio::time::timeout(self.tap_timeout, prompt.tapped()).await;
        self.ui.dismiss_tap_prompt();

        match tapped {
            Ok(true) => match self.play_fresh(&mut audio).await {
                PlaybackAttemptResult::Played(completion) => {
                    self.unlocked.store(true, Ordering::SeqCst);
                    self.ui.set_status(status::ANSWERING);
                    return PlaybackStart::Playing(completion);
                }
                other => tracing::warn!("playback after tap {}", other.describe()),
            },
            Ok(false) => tracing::debug!("tap prompt declined"),
            Err(_) => tracing::info!("tap prompt timed out"),
        }

        drop(audio);
        match text.clone().settled().await {
            Some(text) => self.ui.show_text(&text),
            None => tracing::debug!("answer was replaced, nothing to show"),
        }
        self.ui.set_status(status::READY);
        PlaybackStart::TextFallback
    }
}

/// Keeps a fresh handle alive until its clip has finished.
fn hold_until_done(
    handle: Box<dyn OutputHandle>,
    completion: PlaybackCompletion,
) -> PlaybackCompletion {
    let (done_tx, held) = PlaybackCompletion::channel();
    tokio::spawn(async move {
        let result = completion.finished().await;
        drop(handle);
        let _ = done_tx.send(result);
    });
    held
}
