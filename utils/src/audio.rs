use std::io::Cursor;

use anyhow::Context;
use base64::Engine;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate of the PCM16 audio produced by the synthesis provider.
pub const SYNTHESIS_PCM16_SAMPLE_RATE: u32 = 22050;

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1
    )?;
    Ok(resampler)
}

pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples.chunks(chunk_size).map(|chunk| {
        let mut chunk = chunk.to_vec();
        chunk.resize(chunk_size, 0.0);
        chunk
    }).collect()
}

/// Converts mono samples between rates. The tail is zero-padded to a full
/// chunk, so the output may carry up to one chunk of trailing silence.
pub fn resample(
    samples: &[f32],
    in_sampling_rate: u32,
    out_sampling_rate: u32,
    chunk_size: usize,
) -> anyhow::Result<Vec<f32>> {
    if in_sampling_rate == out_sampling_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler =
        create_resampler(in_sampling_rate as f64, out_sampling_rate as f64, chunk_size)?;
    let expected = samples.len() * out_sampling_rate as usize / in_sampling_rate as usize;
    let mut resampled = Vec::with_capacity(expected + chunk_size);
    for chunk in split_for_chunks(samples, chunk_size) {
        let mut output = resampler.process(&[chunk], None).context("failed to resample chunk")?;
        if let Some(channel) = output.pop() {
            resampled.extend(channel);
        }
    }
    Ok(resampled)
}

pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

pub fn decode_pcm16(pcm16: &[u8]) -> Vec<f32> {
    pcm16.chunks_exact(2).map(|chunk| {
        let v = i16::from_le_bytes([chunk[0], chunk[1]]);
        (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
    }).collect()
}

pub fn decode(fragment: &str) -> anyhow::Result<Vec<f32>> {
    let pcm16 = base64::engine::general_purpose::STANDARD
        .decode(fragment)
        .context("failed to decode base64 audio fragment")?;
    Ok(decode_pcm16(&pcm16))
}

pub fn encode_pcm16(pcm32: &[f32]) -> Vec<u8> {
    pcm32.iter().flat_map(|&sample| {
        ((sample * i16::MAX as f32) as i16).clamp(i16::MIN, i16::MAX).to_le_bytes()
    }).collect()
}

pub fn encode(pcm32: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(encode_pcm16(pcm32))
}

/// Wraps raw little-endian PCM16 bytes into a WAV container.
pub fn wav_from_pcm16(pcm16: &[u8], sample_rate: u32, channels: u16) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("failed to start wav writer")?;
        for chunk in pcm16.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
        }
        writer.finalize().context("failed to finalize wav")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_survives_base64_transport() {
        let samples = vec![0.0, 0.5, -0.5, 1.0];
        let decoded = decode(&encode(&samples)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(decode("not base64!").is_err());
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        assert_eq!(decode_pcm16(&[0, 0, 1]).len(), 1);
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn wav_header_wraps_samples() {
        let pcm = encode_pcm16(&[0.1; 100]);
        let wav = wav_from_pcm16(&pcm, 16000, 1).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 100);
    }

    #[test]
    fn resample_to_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 22050, 22050, 1024).unwrap(), samples);
    }

    #[test]
    fn resample_doubles_length_when_doubling_rate() {
        let samples = vec![0.0; 2048];
        let out = resample(&samples, 22050, 44100, 1024).unwrap();
        assert!(out.len() >= 3800 && out.len() <= 4200, "got {}", out.len());
    }
}
