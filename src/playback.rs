use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::synthesis::SpeechAudio;

mod device;
mod queue;
mod speaker;
mod unlock;

pub use device::CpalOutput;
pub use queue::{
    PlaybackQueue, QueueEvent, QueuedUtterance, SpokenText, SpokenTextWriter, UtterancePlayer,
};
pub use speaker::{Speaker, TextOnlyPlayer};
pub use unlock::{AudioUnlockManager, PlaybackStart};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio output is locked: {0}")]
    Blocked(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("playback was interrupted")]
    Interrupted,
}

/// Resolves when started audio has finished playing.
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<Result<(), PlaybackError>>,
}

impl PlaybackCompletion {
    pub fn channel() -> (oneshot::Sender<Result<(), PlaybackError>>, PlaybackCompletion) {
        let (tx, rx) = oneshot::channel();
        (tx, PlaybackCompletion { rx })
    }

    pub async fn finished(self) -> Result<(), PlaybackError> {
        self.rx.await.unwrap_or(Err(PlaybackError::Interrupted))
    }
}

pub enum PlaybackAttemptResult {
    Played(PlaybackCompletion),
    Blocked(String),
    Failed(PlaybackError),
}

impl PlaybackAttemptResult {
    pub fn describe(&self) -> String {
        match self {
            PlaybackAttemptResult::Played(_) => "played".to_string(),
            PlaybackAttemptResult::Blocked(reason) => format!("blocked: {reason}"),
            PlaybackAttemptResult::Failed(e) => format!("failed: {e}"),
        }
    }
}

/// An audio sink that may refuse to play until a user gesture unlocks it.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Forces a suspended output back into a playable state.
    async fn resume(&self) -> Result<(), PlaybackError>;

    /// Opens a fresh output handle.
    async fn open(&self) -> Result<Box<dyn OutputHandle>, PlaybackError>;
}

#[async_trait]
pub trait OutputHandle: Send + Sync {
    /// Starts `audio`; returns as soon as playback has begun or was refused.
    /// A handle that starts playing takes the streamed tail and keeps
    /// feeding it until the stream ends.
    async fn play(&mut self, audio: &mut SpeechAudio) -> PlaybackAttemptResult;
}
