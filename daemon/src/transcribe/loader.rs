//! Resolving connection parameters into a loaded Whisper model.

use anyhow::{Context, Result, anyhow};
use livescribe_common::protocol::ConnectParams;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, info};
use whisper_rs::WhisperContext;

use super::whisper::{WhisperTranscriber, load_context};
use super::{DecodeOptions, ModelLoader, TranscriptionModel};
use crate::config::{ModelConfig, Task, VadSettings};
use crate::error::LoadError;
use crate::models::{ModelId, ModelManager, ModelSize};
use crate::vad::{VadConfig, VoiceActivityDetector};

/// Language value that asks the model to detect the spoken language.
pub const AUTO_LANGUAGE: &str = "auto";

/// What a session asked for, after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    /// `None` for automatic detection.
    pub language: Option<String>,
    pub size: ModelSize,
    pub task: Task,
}

impl ModelRequest {
    /// Apply daemon defaults to the parameters a connection supplied.
    pub fn resolve(params: &ConnectParams, defaults: &ModelConfig) -> Result<Self, LoadError> {
        let language = non_empty(&params.language).unwrap_or(defaults.language.as_str());
        let size = ModelSize::parse(non_empty(&params.model).unwrap_or(defaults.size.as_str()))?;
        let task = match non_empty(&params.task) {
            Some(name) => Task::parse(name).ok_or_else(|| LoadError::UnknownTask(name.to_string()))?,
            None => defaults.task,
        };

        let language = if language.eq_ignore_ascii_case(AUTO_LANGUAGE) {
            None
        } else {
            Some(language.to_ascii_lowercase())
        };

        if size.is_english_only() {
            match language.as_deref() {
                None | Some("en") => {
                    return Ok(Self {
                        language: Some("en".to_string()),
                        size,
                        task,
                    });
                }
                Some(other) => {
                    return Err(LoadError::UnsupportedLanguage(format!(
                        "{other} (model {size} is English-only)"
                    )));
                }
            }
        }

        Ok(Self {
            language,
            size,
            task,
        })
    }

    pub fn decode_options(&self, threads: u16) -> DecodeOptions {
        DecodeOptions {
            language: self.language.clone(),
            translate: self.task == Task::Translate,
            threads,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

/// Loaded weights keyed by model size.
///
/// Each size has its own slot. A slow first load of one size only holds up
/// sessions asking for that same size, and they reuse its result instead of
/// fetching again.
pub(crate) struct WeightCache<T> {
    slots: Mutex<HashMap<ModelSize, Slot<T>>>,
}

impl<T> WeightCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Weights for `size`, calling `load` if no earlier load succeeded.
    pub(crate) fn get_or_load(
        &self,
        size: ModelSize,
        load: impl FnOnce() -> Result<Arc<T>>,
    ) -> Result<Arc<T>> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| anyhow!("Model cache lock poisoned"))?;
            Arc::clone(slots.entry(size).or_default())
        };

        let mut weights = slot
            .lock()
            .map_err(|_| anyhow!("Model slot for {size} poisoned"))?;
        if let Some(loaded) = weights.as_ref() {
            debug!(size = %size, "Reusing loaded Whisper weights");
            return Ok(Arc::clone(loaded));
        }

        let loaded = load()?;
        *weights = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

/// Loads Whisper models, sharing weights between sessions of the same size.
///
/// Every session gets its own decoding state and VAD instance.
pub struct WhisperLoader {
    models: ModelManager,
    vad: VadSettings,
    threads: u16,
    runtime: Handle,
    contexts: WeightCache<WhisperContext>,
}

impl WhisperLoader {
    pub fn new(models: ModelManager, vad: VadSettings, threads: u16, runtime: Handle) -> Self {
        Self {
            models,
            vad,
            threads,
            runtime,
            contexts: WeightCache::new(),
        }
    }

    /// Shared weights for `size`, loading them on first use.
    fn context_for(&self, size: ModelSize) -> Result<Arc<WhisperContext>> {
        self.contexts.get_or_load(size, || {
            let path = self
                .runtime
                .block_on(self.models.ensure_model(ModelId::Whisper(size)))
                .with_context(|| format!("Whisper model {size} is unavailable"))?;
            load_context(&path)
        })
    }

    fn speech_gate(&self) -> Result<VoiceActivityDetector> {
        let path = self
            .runtime
            .block_on(self.models.ensure_model(ModelId::SileroVad))
            .context("VAD model is unavailable")?;
        VoiceActivityDetector::new(path, VadConfig::from(&self.vad))
    }
}

impl ModelLoader for WhisperLoader {
    fn load(&self, request: &ModelRequest) -> Result<TranscriptionModel, LoadError> {
        if let Some(language) = &request.language {
            if whisper_rs::get_lang_id(language).is_none() {
                return Err(LoadError::UnsupportedLanguage(language.clone()));
            }
        }

        let context = self
            .context_for(request.size)
            .map_err(LoadError::unavailable)?;
        let backend = WhisperTranscriber::new(context).map_err(LoadError::unavailable)?;
        let mut model =
            TranscriptionModel::new(Box::new(backend), request.decode_options(self.threads));

        if self.vad.enabled {
            let gate = self.speech_gate().map_err(LoadError::unavailable)?;
            model = model.with_speech_gate(Box::new(gate));
        }

        info!(
            size = %request.size,
            language = request.language.as_deref().unwrap_or(AUTO_LANGUAGE),
            task = ?request.task,
            vad = self.vad.enabled,
            "Model ready for session"
        );
        Ok(model)
    }
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;
