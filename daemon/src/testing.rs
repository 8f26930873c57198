//! Deterministic stand-ins for the speech backend, shared by unit tests.

use anyhow::{Result, bail};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::samples_to_seconds;
use crate::error::LoadError;
use crate::transcribe::{
    DecodeOptions, ModelLoader, ModelRequest, SpeechGate, TranscriptSegment, Transcriber,
    TranscriptionModel, Word,
};
use crate::vad::SpeechRegion;

#[derive(Clone, Copy, Default)]
enum Mode {
    #[default]
    Echo,
    Fail,
    Panic,
}

/// Transcriber that names each chunk after its length: `chunk-<samples>`.
#[derive(Clone, Default)]
pub struct StubTranscriber {
    delay: Duration,
    mode: Mode,
    text: Option<String>,
    inputs: Arc<Mutex<Vec<Vec<f32>>>>,
    options: Arc<Mutex<Vec<DecodeOptions>>>,
    calls: Arc<AtomicUsize>,
}

impl StubTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.mode = Mode::Fail;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.mode = Mode::Panic;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<Vec<f32>> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn options_seen(&self) -> Vec<DecodeOptions> {
        self.options.lock().unwrap().clone()
    }

    pub fn model(&self) -> TranscriptionModel {
        TranscriptionModel::new(Box::new(self.clone()), DecodeOptions::default())
    }
}

impl Transcriber for StubTranscriber {
    fn transcribe(
        &mut self,
        audio: &[f32],
        options: &DecodeOptions,
    ) -> Result<Vec<TranscriptSegment>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(audio.to_vec());
        self.options.lock().unwrap().push(options.clone());

        match self.mode {
            Mode::Echo => {}
            Mode::Fail => bail!("stub backend failure"),
            Mode::Panic => panic!("stub backend panic"),
        }

        let text = self
            .text
            .clone()
            .unwrap_or_else(|| format!("chunk-{}", audio.len()));
        let end = samples_to_seconds(audio.len());
        Ok(vec![TranscriptSegment {
            words: vec![Word {
                text: text.clone(),
                start: 0.0,
                end,
                probability: 0.9,
            }],
            text,
            start: 0.0,
            end,
        }])
    }
}

/// Speech gate that reports fixed regions regardless of input.
pub struct StubGate {
    pub regions: Result<Vec<SpeechRegion>, String>,
}

impl SpeechGate for StubGate {
    fn detect(&mut self, _audio: &[f32]) -> Result<Vec<SpeechRegion>> {
        match &self.regions {
            Ok(regions) => Ok(regions.clone()),
            Err(message) => bail!("{message}"),
        }
    }
}

/// Loader handing out [`StubTranscriber`] models that share one recorder.
#[derive(Default)]
pub struct StubLoader {
    pub transcriber: StubTranscriber,
    pub reject: bool,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl StubLoader {
    pub fn new(transcriber: StubTranscriber) -> Self {
        Self {
            transcriber,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, request: &ModelRequest) -> Result<TranscriptionModel, LoadError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.reject {
            return Err(LoadError::Unavailable("stub model missing".to_string()));
        }
        Ok(TranscriptionModel::new(
            Box::new(self.transcriber.clone()),
            request.decode_options(0),
        ))
    }
}
