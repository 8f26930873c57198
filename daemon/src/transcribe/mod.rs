//! Speech-to-text transcription.
//!
//! The [`Transcriber`] trait is the raw inference backend. [`TranscriptionModel`]
//! adds the per-chunk policy around it (PCM normalization and voice-activity
//! filtering) and turns backend failures into an empty result. A
//! [`ModelLoader`] builds one model per session.

use anyhow::Result;
use serde::Serialize;

use crate::error::LoadError;
use crate::vad::{SpeechRegion, VoiceActivityDetector};

mod loader;
mod model;
mod whisper;

pub use loader::{AUTO_LANGUAGE, ModelRequest, WhisperLoader};
pub use model::TranscriptionModel;
pub use whisper::{WhisperTranscriber, WordBuilder, load_context};

/// A recognized word with timing in seconds relative to the chunk start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
    /// Confidence in [0, 1].
    pub probability: f32,
}

/// A time-aligned piece of recognized text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub words: Vec<Word>,
}

impl TranscriptSegment {
    /// Rewrite every timestamp of the segment and its words.
    pub fn map_times(&mut self, f: impl Fn(f64) -> f64) {
        self.start = f(self.start);
        self.end = f(self.end);
        for word in &mut self.words {
            word.start = f(word.start);
            word.end = f(word.end);
        }
    }
}

/// Decoding options fixed for the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Spoken language, or `None` for automatic detection.
    pub language: Option<String>,
    /// Translate to English instead of transcribing in the spoken language.
    pub translate: bool,
    /// Inference threads. 0 lets the backend decide.
    pub threads: u16,
}

/// Speech-to-text backend.
pub trait Transcriber: Send {
    /// Transcribe 16 kHz mono f32 audio into time-aligned segments with
    /// word-level timestamps.
    fn transcribe(&mut self, audio: &[f32], options: &DecodeOptions)
    -> Result<Vec<TranscriptSegment>>;
}

/// Classifies which parts of a chunk contain speech.
pub trait SpeechGate: Send {
    fn detect(&mut self, audio: &[f32]) -> Result<Vec<SpeechRegion>>;
}

impl SpeechGate for VoiceActivityDetector {
    fn detect(&mut self, audio: &[f32]) -> Result<Vec<SpeechRegion>> {
        VoiceActivityDetector::detect(self, audio)
    }
}

/// Builds a ready-to-use model for one session.
///
/// Loading may block (weights, downloads); call it off the async runtime.
pub trait ModelLoader: Send + Sync {
    fn load(&self, request: &ModelRequest) -> Result<TranscriptionModel, LoadError>;
}
