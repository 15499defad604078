//! # Speech Recognizer
//!
//! The seam between the gateway and the native recognition engine. The
//! `Recognizer` trait is the black-box contract: complete WAV bytes plus a
//! language hint in, concatenated segment text out. The production
//! implementation binds whisper.cpp through `whisper-rs`; tests substitute
//! lightweight implementations at the trait.
//!
//! ## Audio Handling:
//! Payloads are self-contained WAV files. They are decoded with `hound`,
//! downmixed to mono, and linearly resampled to the 16 kHz the model expects.
//! Anything that is not 16-bit integer PCM is rejected as an engine error.

use anyhow::{anyhow, Context, Result};
use std::io::Cursor;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Sample rate the recognition model consumes.
const MODEL_SAMPLE_RATE: u32 = 16_000;

/// Blocking single-payload recognition. Implementations must be shareable
/// across sessions; per-invocation state belongs inside `transcribe`.
pub trait Recognizer: Send + Sync {
    /// Transcribe one complete WAV payload. `language` is a BCP-47 code or
    /// `"auto"` for detection. Returns the concatenated segment text.
    fn transcribe(&self, wav_bytes: &[u8], language: &str) -> Result<String>;
}

/// whisper.cpp-backed recognizer. The context holds the loaded model and is
/// shared by every session; each call runs on a fresh one-shot state.
pub struct WhisperRecognizer {
    context: WhisperContext,
}

impl WhisperRecognizer {
    /// Load the model from disk. This is slow (hundreds of MB of weights)
    /// and happens once at startup.
    pub fn load(model_path: &str) -> Result<Self> {
        tracing::info!(model_path = %model_path, "loading whisper model");
        let context =
            WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .with_context(|| format!("failed to load whisper model from {}", model_path))?;
        Ok(Self { context })
    }
}

impl Recognizer for WhisperRecognizer {
    fn transcribe(&self, wav_bytes: &[u8], language: &str) -> Result<String> {
        let samples = decode_wav(wav_bytes)?;
        if samples.is_empty() {
            return Ok(String::new());
        }

        let mut state = self
            .context
            .create_state()
            .context("failed to create whisper state")?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(language));
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &samples)
            .context("whisper inference failed")?;

        let segment_count = state
            .full_n_segments()
            .context("failed to read segment count")?;
        let mut text = String::new();
        for segment in 0..segment_count {
            text.push_str(
                &state
                    .full_get_segment_text(segment)
                    .with_context(|| format!("failed to read segment {}", segment))?,
            );
        }

        Ok(text)
    }
}

/// Decode a WAV payload to mono f32 samples at the model sample rate.
fn decode_wav(wav_bytes: &[u8]) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_bytes))
        .map_err(|err| anyhow!("failed to parse WAV payload: {}", err))?;

    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(anyhow!(
            "unsupported WAV format: {:?} {} bit (expected 16-bit integer PCM)",
            spec.sample_format,
            spec.bits_per_sample
        ));
    }
    if spec.channels == 0 {
        return Err(anyhow!("unsupported WAV format: zero channels"));
    }

    let raw: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| anyhow!("failed to read WAV samples: {}", err))?;

    // Downmix interleaved channels to mono by averaging each frame.
    let channels = spec.channels as usize;
    let mono: Vec<f32> = raw
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&sample| sample as i32).sum();
            (sum / channels as i32) as f32 / 32768.0
        })
        .collect();

    if spec.sample_rate == MODEL_SAMPLE_RATE {
        Ok(mono)
    } else {
        Ok(resample(&mono, spec.sample_rate, MODEL_SAMPLE_RATE))
    }
}

/// Linear interpolation resampling. Adequate for speech input; the model is
/// far less sensitive than the resampler here.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_16khz_mono() {
        let wav = make_wav(16000, 1, &[0, 16384, -16384]);
        let samples = decode_wav(&wav).unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 0.0).abs() < 1e-6);
        assert!((samples[1] - 0.5).abs() < 1e-3);
        assert!((samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        // Frames: (100, 300) and (-200, 200) average to 200 and 0.
        let wav = make_wav(16000, 2, &[100, 300, -200, 200]);
        let samples = decode_wav(&wav).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 200.0 / 32768.0).abs() < 1e-6);
        assert!(samples[1].abs() < 1e-6);
    }

    #[test]
    fn test_decode_resamples_to_16khz() {
        let wav = make_wav(48000, 1, &vec![1000i16; 48000]);
        let samples = decode_wav(&wav).unwrap();
        assert!((15_900..=16_100).contains(&samples.len()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"definitely not a wav file").is_err());
        assert!(decode_wav(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_unsupported_bit_depth() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(0.25f32).unwrap();
        writer.finalize().unwrap();

        assert!(decode_wav(&cursor.into_inner()).is_err());
    }

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_halves_sample_count() {
        let samples = vec![0.5f32; 3200];
        let resampled = resample(&samples, 16000, 8000);
        assert_eq!(resampled.len(), 1600);
        assert!(resampled.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
