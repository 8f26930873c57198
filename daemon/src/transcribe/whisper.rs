//! Whisper transcription backend.
//!
//! Uses whisper.cpp via whisper-rs for speech-to-text.

use super::{DecodeOptions, TranscriptSegment, Transcriber, Word};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
};

/// Load Whisper weights. The context is shared by every session using the
/// same model size; each session creates its own decoding state from it.
pub fn load_context(model_path: impl AsRef<Path>) -> Result<Arc<WhisperContext>> {
    info!(path = %model_path.as_ref().display(), "Loading Whisper model");

    let ctx = WhisperContext::new_with_params(
        model_path.as_ref().to_str().context("Invalid model path")?,
        WhisperContextParameters::default(),
    )
    .context("Failed to load Whisper model")?;

    Ok(Arc::new(ctx))
}

/// Whisper speech-to-text transcriber with its own decoding state.
pub struct WhisperTranscriber {
    context: Arc<WhisperContext>,
    state: WhisperState,
}

impl WhisperTranscriber {
    pub fn new(context: Arc<WhisperContext>) -> Result<Self> {
        let state = context
            .create_state()
            .context("Failed to create Whisper state")?;
        Ok(Self { context, state })
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &mut self,
        audio: &[f32],
        options: &DecodeOptions,
    ) -> Result<Vec<TranscriptSegment>> {
        debug!(
            samples = audio.len(),
            language = ?options.language,
            translate = options.translate,
            "Transcribing audio with Whisper"
        );

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        // None lets Whisper detect the language
        params.set_language(options.language.as_deref());
        params.set_translate(options.translate);
        params.set_token_timestamps(true);
        params.set_no_context(true);
        params.set_suppress_blank(true);
        if options.threads > 0 {
            params.set_n_threads(options.threads as i32);
        }

        // Disable printing to stdout
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        self.state
            .full(params, audio)
            .context("Whisper inference failed")?;

        let eot = self.context.token_eot();
        let mut segments = Vec::new();

        for i in 0..self.state.full_n_segments() {
            let Some(segment) = self.state.get_segment(i) else {
                continue;
            };
            let text = segment
                .to_str_lossy()
                .context("Failed to read segment text")?
                .trim()
                .to_string();

            let mut words = WordBuilder::default();
            for t in 0..segment.n_tokens() {
                let Some(token) = segment.get_token(t) else {
                    continue;
                };
                // Timestamps and control tokens sort after end-of-text
                if token.token_id() >= eot {
                    continue;
                }
                let Ok(piece) = token.to_str_lossy() else {
                    continue;
                };
                let data = token.token_data();
                words.push(&piece, data.t0, data.t1, token.token_probability());
            }

            segments.push(TranscriptSegment {
                text,
                start: centis_to_seconds(segment.start_timestamp()),
                end: centis_to_seconds(segment.end_timestamp()),
                words: words.finish(),
            });
        }

        debug!(segments = segments.len(), "Transcription complete");
        Ok(segments)
    }
}

fn centis_to_seconds(centis: i64) -> f64 {
    centis as f64 / 100.0
}

/// Joins sub-word tokens into words. A token with a leading space starts a
/// new word. Times are in centiseconds, as whisper.cpp reports them.
#[derive(Debug, Default)]
pub struct WordBuilder {
    words: Vec<Word>,
    text: String,
    start: i64,
    end: i64,
    probability_sum: f32,
    tokens: usize,
}

impl WordBuilder {
    pub fn push(&mut self, piece: &str, t0: i64, t1: i64, probability: f32) {
        if piece.starts_with(' ') && !self.text.trim().is_empty() {
            self.flush();
        }
        if self.tokens == 0 {
            self.start = t0;
        }
        self.text.push_str(piece);
        self.end = t1.max(self.start);
        self.probability_sum += probability;
        self.tokens += 1;
    }

    pub fn finish(mut self) -> Vec<Word> {
        self.flush();
        self.words
    }

    fn flush(&mut self) {
        if self.tokens > 0 {
            let text = self.text.trim();
            if !text.is_empty() {
                self.words.push(Word {
                    text: text.to_string(),
                    start: centis_to_seconds(self.start),
                    end: centis_to_seconds(self.end),
                    probability: self.probability_sum / self.tokens as f32,
                });
            }
        }
        self.text.clear();
        self.probability_sum = 0.0;
        self.tokens = 0;
    }
}
