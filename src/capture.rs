use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::consts::{MIN_RECORDING_BYTES, MIN_RECORDING_DURATION};
use crate::utils;

mod device;

pub use device::CpalMicrophone;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("no microphone available: {0}")]
    DeviceUnavailable(String),
    #[error("audio capture not supported: {0}")]
    Unsupported(String),
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error("recording already finalized")]
    AlreadyFinalized,
    #[error("failed to encode recording: {0}")]
    Encoding(String),
}

impl CaptureError {
    /// Instructive message for the visitor.
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::PermissionDenied(_) => {
                "Microphone access was denied. Please allow microphone access and try again, \
                 or use the text chat instead."
                    .to_string()
            }
            CaptureError::DeviceUnavailable(_) => {
                "No microphone was found. Please connect a microphone or use the text chat instead."
                    .to_string()
            }
            CaptureError::Unsupported(_) => {
                "Voice recording is not supported here. Please use the text chat instead."
                    .to_string()
            }
            other => format!("Recording failed: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort { duration: Duration },
    Empty { bytes: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TooShort { duration } => {
                write!(f, "recording too short ({} ms)", duration.as_millis())
            }
            RejectReason::Empty { bytes } => write!(f, "recording empty ({bytes} bytes)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFormat {
    /// Raw little-endian PCM16 chunks, wrapped into WAV on finalize.
    Pcm16 { sample_rate: u32, channels: u16 },
    /// Chunks of an already encoded container, concatenated as-is.
    Encoded { mime_type: String },
}

impl CaptureFormat {
    pub fn mime_type(&self) -> &str {
        match self {
            CaptureFormat::Pcm16 { .. } => "audio/wav",
            CaptureFormat::Encoded { mime_type } => mime_type,
        }
    }

    pub fn extension(&self) -> &'static str {
        let mime = self.mime_type();
        if mime.contains("wav") {
            "wav"
        } else if mime.contains("mp4") {
            "mp4"
        } else if mime.contains("ogg") {
            "ogg"
        } else {
            "webm"
        }
    }
}

/// A live microphone. Chunks arrive on the receiver until `release` runs.
pub struct CaptureStream {
    format: CaptureFormat,
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureStream {
    pub fn new(
        format: CaptureFormat,
        chunks: mpsc::UnboundedReceiver<Vec<u8>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            format,
            chunks,
            release: Some(Box::new(release)),
        }
    }

    pub fn format(&self) -> &CaptureFormat {
        &self.format
    }

    /// Stops the underlying device. Idempotent.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = self.chunks.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self) -> Result<CaptureStream, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed,
}

/// Chunks of one recording, in arrival order.
#[derive(Debug)]
pub struct RecordingSession {
    started_at: Instant,
    chunks: Vec<Vec<u8>>,
    format: CaptureFormat,
    state: SessionState,
}

impl RecordingSession {
    pub fn new(format: CaptureFormat) -> Self {
        Self {
            started_at: Instant::now(),
            chunks: Vec::new(),
            format,
            state: SessionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn push_chunk(&mut self, chunk: Vec<u8>) -> Result<(), CaptureError> {
        if !self.is_open() {
            return Err(CaptureError::AlreadyFinalized);
        }
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        Ok(())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Closes the session and returns the encoded recording.
    pub fn finalize(&mut self) -> Result<Vec<u8>, CaptureError> {
        if !self.is_open() {
            return Err(CaptureError::AlreadyFinalized);
        }
        self.state = SessionState::Closed;
        let raw: Vec<u8> = std::mem::take(&mut self.chunks).concat();
        match &self.format {
            CaptureFormat::Encoded { .. } => Ok(raw),
            CaptureFormat::Pcm16 { .. } if raw.is_empty() => Ok(raw),
            CaptureFormat::Pcm16 { sample_rate, channels } => {
                utils::audio::wav_from_pcm16(&raw, *sample_rate, *channels)
                    .map_err(|e| CaptureError::Encoding(e.to_string()))
            }
        }
    }
}

/// A finished recording ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAudio {
    bytes: Vec<u8>,
    format: CaptureFormat,
    duration: Duration,
}

impl RecordedAudio {
    pub fn new(bytes: Vec<u8>, format: CaptureFormat, duration: Duration) -> Self {
        Self { bytes, format, duration }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        self.format.mime_type()
    }

    pub fn file_name(&self) -> String {
        format!("recording.{}", self.format.extension())
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Accepted(RecordedAudio),
    Rejected(RejectReason),
}

/// Owns the microphone for at most one recording at a time.
pub struct AudioCaptureSession {
    microphone: Arc<dyn Microphone>,
    active: Option<(RecordingSession, CaptureStream)>,
}

impl AudioCaptureSession {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub async fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        let stream = self.microphone.open().await?;
        let session = RecordingSession::new(stream.format().clone());
        tracing::debug!("recording started ({})", session.format.mime_type());
        self.active = Some((session, stream));
        Ok(())
    }

    /// Releases the microphone and applies the rejection policy: too short
    /// first, then too small.
    pub fn stop(&mut self) -> Result<CaptureOutcome, CaptureError> {
        let (mut session, mut stream) = self.active.take().ok_or(CaptureError::NotRecording)?;
        let duration = session.elapsed();
        stream.release();
        for chunk in stream.drain() {
            session.push_chunk(chunk)?;
        }
        let bytes = session.finalize()?;
        tracing::debug!(
            "recording stopped after {} ms, {} bytes",
            duration.as_millis(),
            bytes.len()
        );

        if duration < MIN_RECORDING_DURATION {
            return Ok(CaptureOutcome::Rejected(RejectReason::TooShort { duration }));
        }
        if bytes.len() < MIN_RECORDING_BYTES {
            return Ok(CaptureOutcome::Rejected(RejectReason::Empty { bytes: bytes.len() }));
        }
        Ok(CaptureOutcome::Accepted(RecordedAudio::new(bytes, session.format, duration)))
    }

    /// Drops any open recording without producing an outcome.
    pub fn abort(&mut self) {
        if let Some((_, mut stream)) = self.active.take() {
            stream.release();
            tracing::debug!("recording aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::test_support::FakeMicrophone;

    fn session(microphone: &Arc<FakeMicrophone>) -> AudioCaptureSession {
        AudioCaptureSession::new(microphone.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn short_recording_is_rejected_even_with_data() {
        let microphone = Arc::new(FakeMicrophone::with_chunks(vec![vec![1u8; 4096]]));
        let mut capture = session(&microphone);

        capture.start().await.unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        let outcome = capture.stop().unwrap();

        assert!(matches!(outcome, CaptureOutcome::Rejected(RejectReason::TooShort { .. })));
        assert_eq!(microphone.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_recording_is_rejected_regardless_of_duration() {
        let microphone = Arc::new(FakeMicrophone::with_chunks(vec![vec![1u8; 40], vec![2u8; 40]]));
        let mut capture = session(&microphone);

        capture.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let outcome = capture.stop().unwrap();

        assert_eq!(outcome, CaptureOutcome::Rejected(RejectReason::Empty { bytes: 80 }));
        assert_eq!(microphone.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_recording_keeps_chunk_order() {
        let chunks = vec![vec![1u8; 100], vec![2u8; 100]];
        let microphone = Arc::new(FakeMicrophone::with_chunks(chunks));
        let mut capture = session(&microphone);

        capture.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let CaptureOutcome::Accepted(audio) = capture.stop().unwrap() else {
            panic!("expected an accepted recording");
        };

        assert_eq!(audio.bytes().len(), 200);
        assert_eq!(audio.bytes()[0], 1);
        assert_eq!(audio.bytes()[199], 2);
        assert_eq!(audio.file_name(), "recording.webm");
        assert_eq!(audio.duration(), Duration::from_secs(1));
        assert!(!capture.is_recording());
    }

    #[tokio::test]
    async fn second_start_fails_while_recording() {
        let microphone = Arc::new(FakeMicrophone::with_chunks(vec![]));
        let mut capture = session(&microphone);

        capture.start().await.unwrap();
        assert_eq!(capture.start().await, Err(CaptureError::AlreadyRecording));
        assert_eq!(microphone.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_without_start_fails() {
        let microphone = Arc::new(FakeMicrophone::with_chunks(vec![]));
        let mut capture = session(&microphone);
        assert_eq!(capture.stop(), Err(CaptureError::NotRecording));
    }

    #[tokio::test]
    async fn acquisition_errors_are_surfaced() {
        let denied = CaptureError::PermissionDenied("denied".into());
        let microphone = Arc::new(FakeMicrophone::failing(denied));
        let mut capture = session(&microphone);

        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert!(err.user_message().contains("allow microphone access"));
        assert!(!capture.is_recording());
    }

    #[test]
    fn finalizing_twice_is_an_error() {
        let mut session = RecordingSession::new(CaptureFormat::Encoded {
            mime_type: "audio/ogg".into(),
        });
        session.push_chunk(vec![1, 2, 3]).unwrap();
        assert_eq!(session.finalize().unwrap(), vec![1, 2, 3]);
        assert_eq!(session.finalize(), Err(CaptureError::AlreadyFinalized));
        assert_eq!(session.push_chunk(vec![4]), Err(CaptureError::AlreadyFinalized));
    }

    #[test]
    fn pcm_recordings_are_wrapped_as_wav() {
        let mut session = RecordingSession::new(CaptureFormat::Pcm16 {
            sample_rate: 16000,
            channels: 1,
        });
        session.push_chunk(vec![0u8; 320]).unwrap();
        let wav = session.finalize().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert!(wav.len() > 320);
    }

    #[test]
    fn extension_follows_mime_type() {
        let ext = |mime: &str| CaptureFormat::Encoded { mime_type: mime.into() }.extension();
        assert_eq!(ext("audio/webm;codecs=opus"), "webm");
        assert_eq!(ext("audio/mp4"), "mp4");
        assert_eq!(ext("audio/ogg"), "ogg");
        assert_eq!(CaptureFormat::Pcm16 { sample_rate: 1, channels: 1 }.extension(), "wav");
    }
}
