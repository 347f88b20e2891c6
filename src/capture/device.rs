use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};

use crate::capture::{CaptureError, CaptureFormat, CaptureStream, Microphone};
use crate::utils;

/// Native microphone. The cpal stream lives on its own thread because it is
/// not `Send`; it is dropped as soon as the capture stream is released.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<CaptureStream, CaptureError> {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || run_capture(device_name, chunk_tx, ready_tx, stop_rx))
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let format = ready_rx
            .await
            .map_err(|_| CaptureError::DeviceUnavailable("capture thread exited".to_string()))??;
        Ok(CaptureStream::new(format, chunk_rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}

fn run_capture(
    device_name: Option<String>,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    ready_tx: oneshot::Sender<Result<CaptureFormat, CaptureError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match build_stream(device_name, chunk_tx) {
        Ok((stream, format)) => {
            let _ = ready_tx.send(Ok(format));
            stream
        }
        Err(e) => {
            tracing::warn!("failed to open microphone: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    // Blocks until released or the capture stream is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!("microphone released");
}

fn build_stream(
    device_name: Option<String>,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<(cpal::Stream, CaptureFormat), CaptureError> {
    let device = utils::device::get_or_default_input(device_name)
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Unsupported(e.to_string()))?;
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    tracing::info!(
        "microphone: {} ({}ch, {}hz)",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        channels,
        sample_rate
    );

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let mono = utils::audio::downmix(data, channels);
        if chunk_tx.send(utils::audio::encode_pcm16(&mono)).is_err() {
            tracing::debug!("capture receiver dropped");
        }
    };
    let stream = device
        .build_input_stream(
            &config,
            input_data_fn,
            |e| tracing::error!("an error occurred on input stream: {}", e),
            None,
        )
        .map_err(map_build_error)?;
    stream.play().map_err(map_play_error)?;

    Ok((stream, CaptureFormat::Pcm16 { sample_rate, channels: 1 }))
}

fn classify_backend(description: String) -> CaptureError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        CaptureError::PermissionDenied(description)
    } else {
        CaptureError::DeviceUnavailable(description)
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> CaptureError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable(e.to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => CaptureError::Unsupported(e.to_string()),
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend(err.description),
        other => CaptureError::DeviceUnavailable(other.to_string()),
    }
}

fn map_play_error(e: cpal::PlayStreamError) -> CaptureError {
    match e {
        cpal::PlayStreamError::BackendSpecific { err } => classify_backend(err.description),
        other => CaptureError::DeviceUnavailable(other.to_string()),
    }
}
