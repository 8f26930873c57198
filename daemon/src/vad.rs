//! Voice activity filtering using Silero VAD.
//!
//! A chunk is split into 512-sample frames, each frame is scored by the
//! Silero ONNX model, and the scores are collapsed into speech regions.
//! Only speech regions are handed to the transcriber.

use anyhow::{Context, Result};
use ndarray::{Array0, Array2, Array3};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use tracing::{debug, trace};

use crate::audio::SAMPLE_RATE;
use crate::config::VadSettings;

/// LSTM hidden state size for Silero VAD.
const LSTM_HIDDEN_SIZE: usize = 128;

/// Context size for 16kHz audio (prepended to each frame).
const CONTEXT_SIZE_16K: usize = 64;

/// Samples per scored frame.
pub const VAD_FRAME_SIZE: usize = 512;

/// Tuning for speech region detection.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Probability threshold for considering a frame speech.
    pub threshold: f32,
    /// Gaps of silence shorter than this are bridged, in samples.
    pub min_silence_samples: usize,
    /// Padding added on both sides of a region, in samples.
    pub speech_pad_samples: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from(&VadSettings::default())
    }
}

impl From<&VadSettings> for VadConfig {
    fn from(settings: &VadSettings) -> Self {
        let per_ms = SAMPLE_RATE as usize / 1000;
        Self {
            threshold: settings.threshold,
            min_silence_samples: settings.min_silence_ms as usize * per_ms,
            speech_pad_samples: settings.speech_pad_ms as usize * per_ms,
        }
    }
}

/// Half-open range `[start, end)` of samples classified as speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechRegion {
    pub start: usize,
    pub end: usize,
}

impl SpeechRegion {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Collapse per-frame speech probabilities into padded, merged speech regions
/// over a buffer of `total_samples` samples.
pub fn speech_regions(
    probabilities: &[f32],
    frame_size: usize,
    total_samples: usize,
    config: &VadConfig,
) -> Vec<SpeechRegion> {
    let mut raw: Vec<SpeechRegion> = Vec::new();

    for (i, &probability) in probabilities.iter().enumerate() {
        if probability < config.threshold {
            continue;
        }
        let start = (i * frame_size).min(total_samples);
        let end = ((i + 1) * frame_size).min(total_samples);
        match raw.last_mut() {
            // Bridge silence shorter than the minimum gap
            Some(last) if start - last.end < config.min_silence_samples => last.end = end,
            _ => raw.push(SpeechRegion { start, end }),
        }
    }

    let mut regions: Vec<SpeechRegion> = Vec::with_capacity(raw.len());
    for region in raw {
        let padded = SpeechRegion {
            start: region.start.saturating_sub(config.speech_pad_samples),
            end: (region.end + config.speech_pad_samples).min(total_samples),
        };
        match regions.last_mut() {
            Some(last) if padded.start <= last.end => last.end = last.end.max(padded.end),
            _ => regions.push(padded),
        }
    }

    regions.retain(|r| !r.is_empty());
    regions
}

/// Maps positions in the gathered speech audio back to the original chunk.
#[derive(Debug, Clone, Default)]
pub struct SpeechTimeline {
    regions: Vec<SpeechRegion>,
}

impl SpeechTimeline {
    pub fn new(regions: Vec<SpeechRegion>) -> Self {
        Self { regions }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Concatenate the speech regions of `audio`.
    pub fn gather(&self, audio: &[f32]) -> Vec<f32> {
        let mut speech = Vec::with_capacity(self.regions.iter().map(SpeechRegion::len).sum());
        for region in &self.regions {
            let end = region.end.min(audio.len());
            if region.start < end {
                speech.extend_from_slice(&audio[region.start..end]);
            }
        }
        speech
    }

    /// Convert a time in the gathered audio to a time in the original chunk.
    pub fn to_source_seconds(&self, seconds: f64) -> f64 {
        let rate = SAMPLE_RATE as f64;
        let mut remaining = (seconds.max(0.0) * rate).round() as usize;

        for region in &self.regions {
            if remaining < region.len() {
                return (region.start + remaining) as f64 / rate;
            }
            remaining -= region.len();
        }

        self.regions
            .last()
            .map(|r| r.end as f64 / rate)
            .unwrap_or(seconds)
    }
}

/// Voice Activity Detector using Silero VAD ONNX model.
pub struct VoiceActivityDetector {
    session: Session,
    /// LSTM state: shape (2, 1, 128) - combines h and c states.
    state: Array3<f32>,
    /// Audio context from the previous frame (64 samples at 16kHz).
    context: Vec<f32>,
    config: VadConfig,
}

impl VoiceActivityDetector {
    /// Load the Silero VAD model from the given path.
    pub fn new(model_path: impl AsRef<Path>, config: VadConfig) -> Result<Self> {
        debug!(path = %model_path.as_ref().display(), "Loading VAD model");

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .with_intra_threads(1)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path.as_ref())
            .with_context(|| {
                format!(
                    "Failed to load VAD model from {}",
                    model_path.as_ref().display()
                )
            })?;

        Ok(Self {
            session,
            state: Array3::<f32>::zeros((2, 1, LSTM_HIDDEN_SIZE)),
            context: vec![0.0f32; CONTEXT_SIZE_16K],
            config,
        })
    }

    /// Score one frame of exactly [`VAD_FRAME_SIZE`] samples and return the
    /// speech probability.
    pub fn process_frame(&mut self, audio: &[f32]) -> Result<f32> {
        if audio.len() != VAD_FRAME_SIZE {
            anyhow::bail!(
                "Audio frame size {} doesn't match expected {}",
                audio.len(),
                VAD_FRAME_SIZE
            );
        }

        // Silero expects the tail of the previous frame in front of each input
        let mut input_with_context = self.context.clone();
        input_with_context.extend_from_slice(audio);

        let audio_array =
            Array2::from_shape_vec((1, VAD_FRAME_SIZE + CONTEXT_SIZE_16K), input_with_context)
                .context("Failed to create audio array")?;
        let sr_array = Array0::from_elem((), SAMPLE_RATE as i64);

        let input_tensor = TensorRef::from_array_view(&audio_array)?;
        let sr_tensor = TensorRef::from_array_view(&sr_array)?;
        let state_tensor = TensorRef::from_array_view(&self.state)?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input" => input_tensor,
                "sr" => sr_tensor,
                "state" => state_tensor
            ])
            .context("VAD inference failed")?;

        self.context = audio[audio.len() - CONTEXT_SIZE_16K..].to_vec();

        let (_, output_data) = outputs["output"]
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;
        let probability = output_data.first().copied().unwrap_or(0.0);

        let (_, state_data) = outputs["stateN"]
            .try_extract_tensor::<f32>()
            .context("Failed to extract state tensor")?;
        self.state = Array3::from_shape_vec((2, 1, LSTM_HIDDEN_SIZE), state_data.to_vec())
            .context("Failed to reshape state")?;

        trace!(probability = probability, "VAD frame scored");
        Ok(probability)
    }

    /// Find the speech regions of a whole chunk.
    ///
    /// Each call starts from a fresh model state; chunks are independent.
    pub fn detect(&mut self, audio: &[f32]) -> Result<Vec<SpeechRegion>> {
        self.reset();

        let mut probabilities = Vec::with_capacity(audio.len().div_ceil(VAD_FRAME_SIZE));
        let mut frame = [0.0f32; VAD_FRAME_SIZE];
        for chunk in audio.chunks(VAD_FRAME_SIZE) {
            // Zero-pad the trailing partial frame
            frame.fill(0.0);
            frame[..chunk.len()].copy_from_slice(chunk);
            probabilities.push(self.process_frame(&frame)?);
        }

        let regions = speech_regions(&probabilities, VAD_FRAME_SIZE, audio.len(), &self.config);
        debug!(
            frames = probabilities.len(),
            regions = regions.len(),
            "VAD pass complete"
        );
        Ok(regions)
    }

    /// Reset the detector state.
    pub fn reset(&mut self) {
        self.state = Array3::<f32>::zeros((2, 1, LSTM_HIDDEN_SIZE));
        self.context = vec![0.0f32; CONTEXT_SIZE_16K];
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

#[cfg(test)]
#[path = "vad_test.rs"]
mod tests;
