//! Per-session transcription policy wrapped around a backend.

use anyhow::{Result, anyhow};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, trace};

use super::{DecodeOptions, SpeechGate, TranscriptSegment, Transcriber};
use crate::audio::normalize_pcm;
use crate::vad::SpeechTimeline;

/// A loaded model ready to transcribe chunks for one session.
///
/// Owned by exactly one session worker. Each chunk is transcribed on its own;
/// no decoder context carries over between calls.
pub struct TranscriptionModel {
    backend: Box<dyn Transcriber>,
    gate: Option<Box<dyn SpeechGate>>,
    options: DecodeOptions,
}

impl TranscriptionModel {
    pub fn new(backend: Box<dyn Transcriber>, options: DecodeOptions) -> Self {
        Self {
            backend,
            gate: None,
            options,
        }
    }

    /// Only transcribe the parts of each chunk the gate classifies as speech.
    pub fn with_speech_gate(mut self, gate: Box<dyn SpeechGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn has_speech_gate(&self) -> bool {
        self.gate.is_some()
    }

    /// Transcribe one chunk of 16 kHz PCM.
    ///
    /// Never fails: any backend or VAD error, including a panic, yields an
    /// empty result. Timestamps are seconds from the chunk start.
    pub fn transcribe(&mut self, samples: &[i16]) -> Vec<TranscriptSegment> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_transcribe(samples)))
            .unwrap_or_else(|_| Err(anyhow!("transcription backend panicked")));

        match outcome {
            Ok(segments) => segments,
            Err(e) => {
                debug!(error = %format!("{e:#}"), samples = samples.len(), "Transcription failed, returning empty result");
                Vec::new()
            }
        }
    }

    fn try_transcribe(&mut self, samples: &[i16]) -> Result<Vec<TranscriptSegment>> {
        let (audio, peak) = normalize_pcm(samples);
        if peak == 0.0 {
            trace!(samples = samples.len(), "Silent chunk skipped");
            return Ok(Vec::new());
        }

        let segments = match self.gate.as_mut() {
            None => self.backend.transcribe(&audio, &self.options)?,
            Some(gate) => {
                let timeline = SpeechTimeline::new(gate.detect(&audio)?);
                if timeline.is_empty() {
                    trace!(samples = samples.len(), "No speech in chunk");
                    return Ok(Vec::new());
                }
                let speech = timeline.gather(&audio);
                let mut segments = self.backend.transcribe(&speech, &self.options)?;
                for segment in &mut segments {
                    segment.map_times(|t| timeline.to_source_seconds(t));
                }
                segments
            }
        };

        Ok(segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect())
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
