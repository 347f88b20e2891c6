use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::playback::PlaybackCompletion;
use crate::synthesis::SynthesisOutput;
use crate::types::Utterance;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Audio for the utterance began playing. Carries the text known at that
    /// moment, which for a streamed answer may still be growing.
    Started(Utterance),
    /// The utterance is done, played or not.
    Finished(Utterance),
    /// Nothing is playing and nothing is pending.
    Drained,
}

#[derive(Debug, Clone)]
enum TextState {
    Partial(String),
    Settled(String),
}

/// The words behind an utterance. Fixed for ordinary utterances; for an
/// answer that started speaking early it grows until the writer settles
/// it, and dropping the writer unsettled discards it.
#[derive(Debug, Clone)]
pub struct SpokenText {
    rx: watch::Receiver<TextState>,
}

pub struct SpokenTextWriter {
    tx: watch::Sender<TextState>,
}

impl SpokenText {
    pub fn fixed(text: &str) -> Self {
        let (_, rx) = watch::channel(TextState::Settled(text.to_string()));
        Self { rx }
    }

    pub fn channel(text: &str) -> (SpokenTextWriter, SpokenText) {
        let (tx, rx) = watch::channel(TextState::Partial(text.to_string()));
        (SpokenTextWriter { tx }, SpokenText { rx })
    }

    pub fn current(&self) -> String {
        match &*self.rx.borrow() {
            TextState::Partial(text) | TextState::Settled(text) => text.clone(),
        }
    }

    /// Waits for the final text. `None` when it was discarded.
    pub async fn settled(mut self) -> Option<String> {
        loop {
            if let TextState::Settled(text) = &*self.rx.borrow_and_update() {
                return Some(text.clone());
            }
            if self.rx.changed().await.is_err() {
                return match &*self.rx.borrow() {
                    TextState::Settled(text) => Some(text.clone()),
                    TextState::Partial(_) => None,
                };
            }
        }
    }
}

impl SpokenTextWriter {
    pub fn update(&self, text: &str) {
        self.tx.send_replace(TextState::Partial(text.to_string()));
    }

    pub fn settle(self, text: &str) {
        self.tx.send_replace(TextState::Settled(text.to_string()));
    }
}

/// An utterance waiting in the queue. A streamed one already has audio on
/// the way from a synthesis stream opened before its text was complete.
pub struct QueuedUtterance {
    utterance: Utterance,
    text: SpokenText,
    stream: Option<SynthesisOutput>,
}

impl QueuedUtterance {
    pub fn utterance(&self) -> &Utterance {
        &self.utterance
    }

    pub fn text(&self) -> &SpokenText {
        &self.text
    }

    pub fn into_parts(self) -> (Utterance, SpokenText, Option<SynthesisOutput>) {
        (self.utterance, self.text, self.stream)
    }
}

#[async_trait]
pub trait UtterancePlayer: Send + Sync {
    /// Prepares and starts audio for the utterance. `None` means nothing is
    /// audible (the player already showed a fallback).
    async fn start(&self, item: QueuedUtterance) -> Option<PlaybackCompletion>;
}

/// FIFO of utterances with at most one active at a time.
#[derive(Clone)]
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<QueuedUtterance>,
    next_sequence: Arc<AtomicU64>,
}

impl PlaybackQueue {
    /// Spawns the worker. It stops when `cancel` fires or every handle is
    /// dropped.
    pub fn spawn(
        player: Arc<dyn UtterancePlayer>,
        events: mpsc::UnboundedSender<QueueEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(player, rx, events, cancel));
        Self {
            tx,
            next_sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn enqueue(&self, text: &str) -> Utterance {
        self.push(SpokenText::fixed(text), None)
    }

    /// Queues audio that is already being synthesized while `text` grows.
    pub fn enqueue_streaming(&self, text: SpokenText, stream: SynthesisOutput) -> Utterance {
        self.push(text, Some(stream))
    }

    fn push(&self, text: SpokenText, stream: Option<SynthesisOutput>) -> Utterance {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let utterance = Utterance::new(text.current(), sequence);
        tracing::debug!("enqueue utterance #{}", sequence);
        let item = QueuedUtterance {
            utterance: utterance.clone(),
            text,
            stream,
        };
        if self.tx.send(item).is_err() {
            tracing::warn!("playback queue is closed, dropping utterance #{}", sequence);
        }
        utterance
    }
}

async fn run_worker(
    player: Arc<dyn UtterancePlayer>,
    mut rx: mpsc::UnboundedReceiver<QueuedUtterance>,
    events: mpsc::UnboundedSender<QueueEvent>,
    cancel: CancellationToken,
) {
    let mut pending: VecDeque<QueuedUtterance> = VecDeque::new();
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        pending.push_back(first);

        while let Some(item) = pending.pop_front() {
            let utterance = item.utterance().clone();
            let played = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                played = play_one(player.as_ref(), item, &events) => played,
            };
            if let Err(e) = played {
                let sequence = utterance.sequence();
                tracing::warn!("utterance #{} ended with an audio error: {}", sequence, e);
            }
            let _ = events.send(QueueEvent::Finished(utterance));
            while let Ok(more) = rx.try_recv() {
                pending.push_back(more);
            }
        }
        let _ = events.send(QueueEvent::Drained);
    }
    tracing::debug!("playback queue stopped");
}

async fn play_one(
    player: &dyn UtterancePlayer,
    item: QueuedUtterance,
    events: &mpsc::UnboundedSender<QueueEvent>,
) -> Result<(), crate::playback::PlaybackError> {
    let sequence = item.utterance().sequence();
    let text = item.text().clone();
    match player.start(item).await {
        Some(completion) => {
            let _ = events.send(QueueEvent::Started(Utterance::new(text.current(), sequence)));
            completion.finished().await
        }
        None => Ok(()),
    }
}
