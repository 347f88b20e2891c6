use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapProd;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use crate::playback::{
    AudioOutput, OutputHandle, PlaybackAttemptResult, PlaybackCompletion, PlaybackError,
};
use crate::synthesis::{AudioClip, SpeechAudio};
use crate::utils;

const OUTPUT_CHUNK_SIZE: usize = 1024;
const OUTPUT_BUFFER_SECS: usize = 2;
const DRAIN_POLL: Duration = Duration::from_millis(10);

type Ready = Result<(HeapProd<f32>, u32), PlaybackError>;

/// Native speaker output. Each handle owns one cpal stream on a dedicated
/// thread, fed through a ring buffer.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn resume(&self) -> Result<(), PlaybackError> {
        let device_name = self.device_name.clone();
        let lookup = move || utils::device::get_or_default_output(device_name).map(|_| ());
        tokio::task::spawn_blocking(lookup)
            .await
            .map_err(|e| PlaybackError::Device(e.to_string()))?
            .map_err(|e| PlaybackError::Device(e.to_string()))
    }

    async fn open(&self) -> Result<Box<dyn OutputHandle>, PlaybackError> {
        let (ready_tx, ready_rx) = oneshot::channel::<Ready>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        std::thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || run_output(device_name, ready_tx, stop_rx))
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        let (producer, sample_rate) = ready_rx
            .await
            .map_err(|_| PlaybackError::Device("output thread exited".to_string()))??;
        Ok(Box::new(CpalHandle {
            producer: Arc::new(Mutex::new(producer)),
            sample_rate,
            stop: stop_tx,
        }))
    }
}

struct CpalHandle {
    producer: Arc<Mutex<HeapProd<f32>>>,
    sample_rate: u32,
    stop: std_mpsc::Sender<()>,
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

#[async_trait]
impl OutputHandle for CpalHandle {
    async fn play(&mut self, audio: &mut SpeechAudio) -> PlaybackAttemptResult {
        let head = match resample(audio.head(), self.sample_rate) {
            Ok(samples) => samples,
            Err(e) => return PlaybackAttemptResult::Failed(e),
        };
        let mut tail = audio.take_tail();
        let (done_tx, completion) = PlaybackCompletion::channel();
        let producer = self.producer.clone();
        let sample_rate = self.sample_rate;

        tokio::spawn(async move {
            let mut producer = producer.lock().await;
            push_all(&mut producer, &head).await;
            let mut result = Ok(());
            if let Some(tail) = tail.as_mut() {
                while let Some(chunk) = tail.next_chunk().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::warn!("synthesis stream failed during playback: {}", e);
                            result = Err(PlaybackError::Interrupted);
                            break;
                        }
                    };
                    match resample(&chunk, sample_rate) {
                        Ok(samples) => push_all(&mut producer, &samples).await,
                        Err(e) => tracing::warn!("dropping audio chunk: {}", e),
                    }
                }
            }

            let queued = producer.occupied_len() as f64 / sample_rate.max(1) as f64;
            let queued = Duration::from_secs_f64(queued);
            let deadline = Instant::now() + queued + Duration::from_secs(2);
            while producer.occupied_len() > 0 {
                if Instant::now() > deadline {
                    result = Err(PlaybackError::Device("output stalled".to_string()));
                    break;
                }
                tokio::time::sleep(DRAIN_POLL).await;
            }
            let _ = done_tx.send(result);
        });
        PlaybackAttemptResult::Played(completion)
    }
}

fn resample(clip: &AudioClip, sample_rate: u32) -> Result<Vec<f32>, PlaybackError> {
    utils::audio::resample(clip.samples(), clip.sample_rate(), sample_rate, OUTPUT_CHUNK_SIZE)
        .map_err(|e| PlaybackError::Device(e.to_string()))
}

/// Pushes every sample, waiting for the output callback to make room.
async fn push_all(producer: &mut HeapProd<f32>, samples: &[f32]) {
    let mut offset = 0;
    while offset < samples.len() {
        offset += producer.push_slice(&samples[offset..]);
        if offset < samples.len() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

fn run_output(
    device_name: Option<String>,
    ready_tx: oneshot::Sender<Ready>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match build_stream(device_name) {
        Ok((stream, producer, sample_rate)) => {
            let _ = ready_tx.send(Ok((producer, sample_rate)));
            stream
        }
        Err(e) => {
            tracing::warn!("failed to open audio output: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!("audio output released");
}

fn build_stream(
    device_name: Option<String>,
) -> Result<(cpal::Stream, HeapProd<f32>, u32), PlaybackError> {
    let output = utils::device::get_or_default_output(device_name)
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    let output_config: cpal::StreamConfig = output
        .default_output_config()
        .map_err(|e| PlaybackError::Device(e.to_string()))?
        .into();
    let output_channel_count = (output_config.channels as usize).max(1);
    let output_sample_rate = output_config.sample_rate.0;

    let audio_out_buffer =
        utils::audio::shared_buffer(output_sample_rate as usize * OUTPUT_BUFFER_SECS);
    let (audio_out_tx, mut audio_out_rx) = audio_out_buffer.split();

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        for frame in data.chunks_mut(output_channel_count) {
            let sample = audio_out_rx.try_pop().unwrap_or(0.0);
            frame.fill(sample);
        }
    };
    let output_stream = output
        .build_output_stream(
            &output_config,
            output_data_fn,
            |err| tracing::error!("an error occurred on output stream: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    output_stream.play().map_err(|e| match e {
        cpal::PlayStreamError::BackendSpecific { err } => PlaybackError::Blocked(err.description),
        other => PlaybackError::Device(other.to_string()),
    })?;

    Ok((output_stream, audio_out_tx, output_sample_rate))
}
