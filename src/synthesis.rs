use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

mod batch;
mod streaming;
mod utils;

pub use batch::BatchClient;
pub use streaming::StreamingClient;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    #[error("failed to connect: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("speech service returned {status}")]
    ServiceUnavailable { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("no audio was produced")]
    NoAudio,
    #[error("synthesis stream closed")]
    Closed,
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        SynthesisError::Network(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SynthesisError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SynthesisError::Connection(e.to_string())
    }
}

/// Mono audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        let len = (duration.as_secs_f64() * sample_rate as f64) as usize;
        Self::new(vec![0.0; len.max(1)], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    Text(String),
    /// No more text; the provider finishes the audio and ends the stream.
    Flush,
    /// Abandon the stream without waiting for the remaining audio.
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisFrame {
    Audio(Vec<f32>),
    Final,
}

/// An open incremental synthesis. Text goes in through [`send_text`], audio
/// is gathered by [`collect`] once the input is flushed. [`split`] separates
/// the two halves so audio can be played while text is still being sent.
///
/// [`send_text`]: SynthesisStream::send_text
/// [`collect`]: SynthesisStream::collect
/// [`split`]: SynthesisStream::split
pub struct SynthesisStream {
    input: SynthesisInput,
    output: SynthesisOutput,
}

impl SynthesisStream {
    pub fn new(
        commands: mpsc::Sender<StreamCommand>,
        frames: mpsc::Receiver<Result<SynthesisFrame, SynthesisError>>,
        sample_rate: u32,
    ) -> Self {
        Self {
            input: SynthesisInput {
                commands,
                sent: String::new(),
                finished: false,
            },
            output: SynthesisOutput {
                frames,
                sample_rate,
                done: false,
            },
        }
    }

    pub fn sent_text(&self) -> &str {
        self.input.sent_text()
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), SynthesisError> {
        self.input.send_text(text).await
    }

    pub async fn flush(&mut self) -> Result<(), SynthesisError> {
        self.input.flush().await
    }

    /// Flushes and waits for the whole clip.
    pub async fn collect(mut self) -> Result<AudioClip, SynthesisError> {
        self.input.flush().await?;
        self.output.collect().await
    }

    pub fn split(self) -> (SynthesisInput, SynthesisOutput) {
        (self.input, self.output)
    }
}

/// The text side of a [`SynthesisStream`]. Dropping it before a flush
/// closes the stream.
pub struct SynthesisInput {
    commands: mpsc::Sender<StreamCommand>,
    sent: String,
    finished: bool,
}

impl SynthesisInput {
    /// Everything sent so far, in order.
    pub fn sent_text(&self) -> &str {
        &self.sent
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), SynthesisError> {
        if self.finished {
            return Err(SynthesisError::Closed);
        }
        if text.is_empty() {
            return Ok(());
        }
        self.commands
            .send(StreamCommand::Text(text.to_string()))
            .await
            .map_err(|_| SynthesisError::Closed)?;
        self.sent.push_str(text);
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), SynthesisError> {
        self.finish(StreamCommand::Flush).await
    }

    /// Ends the stream without waiting for its audio.
    pub async fn close(&mut self) -> Result<(), SynthesisError> {
        self.finish(StreamCommand::Close).await
    }

    async fn finish(&mut self, command: StreamCommand) -> Result<(), SynthesisError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.commands.send(command).await.map_err(|_| SynthesisError::Closed)
    }
}

/// The audio side of a [`SynthesisStream`].
pub struct SynthesisOutput {
    frames: mpsc::Receiver<Result<SynthesisFrame, SynthesisError>>,
    sample_rate: u32,
    done: bool,
}

impl SynthesisOutput {
    /// The next decoded chunk, or `None` once the provider has finished.
    pub async fn next_chunk(&mut self) -> Option<Result<AudioClip, SynthesisError>> {
        while !self.done {
            match self.frames.recv().await {
                Some(Ok(SynthesisFrame::Audio(samples))) if samples.is_empty() => continue,
                Some(Ok(SynthesisFrame::Audio(samples))) => {
                    return Some(Ok(AudioClip::new(samples, self.sample_rate)));
                }
                Some(Ok(SynthesisFrame::Final)) | None => self.done = true,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }

    /// Waits for the first chunk; the rest stays on the returned tail.
    pub async fn into_audio(mut self) -> Result<SpeechAudio, SynthesisError> {
        match self.next_chunk().await {
            Some(Ok(head)) => Ok(SpeechAudio::streamed(head, self)),
            Some(Err(e)) => Err(e),
            None => Err(SynthesisError::NoAudio),
        }
    }

    pub async fn collect(mut self) -> Result<AudioClip, SynthesisError> {
        let mut samples = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            samples.extend_from_slice(chunk?.samples());
        }
        if samples.is_empty() {
            return Err(SynthesisError::NoAudio);
        }
        Ok(AudioClip::new(samples, self.sample_rate))
    }
}

/// Audio ready to start: the first clip, plus the rest of a stream that is
/// still being synthesized.
pub struct SpeechAudio {
    head: AudioClip,
    tail: Option<SynthesisOutput>,
}

impl SpeechAudio {
    pub fn whole(clip: AudioClip) -> Self {
        Self { head: clip, tail: None }
    }

    pub fn streamed(head: AudioClip, tail: SynthesisOutput) -> Self {
        Self { head, tail: Some(tail) }
    }

    pub fn head(&self) -> &AudioClip {
        &self.head
    }

    pub fn is_streamed(&self) -> bool {
        self.tail.is_some()
    }

    /// Taken by the output handle that ends up playing this audio.
    pub fn take_tail(&mut self) -> Option<SynthesisOutput> {
        self.tail.take()
    }
}

#[async_trait]
pub trait StreamingSynthesizer: Send + Sync {
    async fn open(&self) -> Result<SynthesisStream, SynthesisError>;
}

#[async_trait]
pub trait BatchSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, SynthesisError>;
}

/// Playable audio for a piece of text: streaming first, batch when
/// streaming fails before producing any audio.
#[derive(Clone)]
pub struct SpeechSynthesizer {
    streaming: Arc<dyn StreamingSynthesizer>,
    batch: Arc<dyn BatchSynthesizer>,
}

impl SpeechSynthesizer {
    pub fn new(streaming: Arc<dyn StreamingSynthesizer>, batch: Arc<dyn BatchSynthesizer>) -> Self {
        Self { streaming, batch }
    }

    pub async fn open_stream(&self) -> Result<SynthesisStream, SynthesisError> {
        self.streaming.open().await
    }

    /// Starts speaking `text`. Resolves once the first audio is available;
    /// streamed audio keeps arriving on the tail.
    pub async fn speak(&self, text: &str) -> Result<SpeechAudio, SynthesisError> {
        match self.stream_text(text).await {
            Ok(audio) => Ok(audio),
            Err(e) => {
                tracing::warn!("streaming synthesis failed, using batch synthesis: {}", e);
                self.batch(text).await
            }
        }
    }

    pub async fn batch(&self, text: &str) -> Result<SpeechAudio, SynthesisError> {
        self.batch.synthesize(text).await.map(SpeechAudio::whole)
    }

    async fn stream_text(&self, text: &str) -> Result<SpeechAudio, SynthesisError> {
        let mut stream = self.streaming.open().await?;
        stream.send_text(text).await?;
        let (mut input, output) = stream.split();
        input.flush().await?;
        output.into_audio().await
    }
}
