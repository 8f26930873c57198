//! Model download and management.
//!
//! Whisper weights and the Silero VAD model are fetched on first use and
//! validated by size on every lookup.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::LoadError;

/// Whisper model sizes a connection may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSize {
    Tiny,
    TinyEn,
    Base,
    BaseEn,
    Small,
    SmallEn,
    Medium,
    MediumEn,
    LargeV3,
    LargeV3Turbo,
}

impl ModelSize {
    pub const ALL: [ModelSize; 10] = [
        ModelSize::Tiny,
        ModelSize::TinyEn,
        ModelSize::Base,
        ModelSize::BaseEn,
        ModelSize::Small,
        ModelSize::SmallEn,
        ModelSize::Medium,
        ModelSize::MediumEn,
        ModelSize::LargeV3,
        ModelSize::LargeV3Turbo,
    ];

    /// Name as used in configuration and the `model` connection parameter.
    pub fn name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::TinyEn => "tiny.en",
            ModelSize::Base => "base",
            ModelSize::BaseEn => "base.en",
            ModelSize::Small => "small",
            ModelSize::SmallEn => "small.en",
            ModelSize::Medium => "medium",
            ModelSize::MediumEn => "medium.en",
            ModelSize::LargeV3 => "large-v3",
            ModelSize::LargeV3Turbo => "large-v3-turbo",
        }
    }

    pub fn parse(name: &str) -> Result<Self, LoadError> {
        Self::ALL
            .into_iter()
            .find(|size| size.name() == name)
            .ok_or_else(|| LoadError::UnknownModelSize(name.to_string()))
    }

    /// English-only models cannot detect or translate other languages.
    pub fn is_english_only(&self) -> bool {
        self.name().ends_with(".en")
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier for downloadable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelId {
    /// Silero VAD model for voice activity detection.
    SileroVad,
    Whisper(ModelSize),
}

const WHISPER_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

const SILERO_VAD_URL: &str =
    "https://github.com/snakers4/silero-vad/raw/master/src/silero_vad/data/silero_vad.onnx";

impl ModelId {
    /// Get model metadata.
    fn info(&self) -> ModelInfo {
        let size = match self {
            ModelId::SileroVad => {
                return ModelInfo {
                    filename: "silero_vad.onnx".to_string(),
                    url: SILERO_VAD_URL.to_string(),
                    size_bytes: Some(2_327_524),
                };
            }
            ModelId::Whisper(size) => *size,
        };

        let size_bytes = match size {
            ModelSize::Tiny => 77_691_713,
            ModelSize::TinyEn => 77_704_715,
            ModelSize::Base => 147_951_465,
            ModelSize::BaseEn => 147_964_211,
            ModelSize::Small => 487_601_967,
            ModelSize::SmallEn => 487_614_201,
            ModelSize::Medium | ModelSize::MediumEn => 1_533_774_781,
            ModelSize::LargeV3 => 3_094_623_691,
            ModelSize::LargeV3Turbo => 1_624_592_891,
        };
        let filename = format!("ggml-{}.bin", size.name());
        ModelInfo {
            url: format!("{WHISPER_BASE_URL}/{filename}"),
            filename,
            size_bytes: Some(size_bytes),
        }
    }

    /// Filename the model is stored under.
    pub fn filename(&self) -> String {
        self.info().filename
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::SileroVad => f.write_str("silero-vad"),
            ModelId::Whisper(size) => write!(f, "whisper-{size}"),
        }
    }
}

/// Metadata for a downloadable model.
struct ModelInfo {
    /// Filename to save as.
    filename: String,
    /// Download URL.
    url: String,
    /// Expected file size for validation (optional).
    size_bytes: Option<u64>,
}

/// On-disk state of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Ready(PathBuf),
    Missing,
    Corrupted { expected: u64, actual: u64 },
}

/// Bytes received so far during a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

/// Manages model downloads and storage.
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a new ModelManager using the default models directory.
    ///
    /// Default: `~/.local/share/livescribe/models/`
    pub fn new() -> Result<Self> {
        Ok(Self {
            models_dir: livescribe_common::dirs::models_dir()?,
        })
    }

    /// Create a ModelManager with a custom models directory.
    pub fn with_dir(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    /// Get the models directory path.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Inspect a model without downloading anything.
    pub async fn check_model(&self, model: ModelId) -> ModelStatus {
        let info = model.info();
        let path = self.models_dir.join(&info.filename);

        let Ok(metadata) = fs::metadata(&path).await else {
            return ModelStatus::Missing;
        };
        match info.size_bytes {
            Some(expected) if metadata.len() != expected => ModelStatus::Corrupted {
                expected,
                actual: metadata.len(),
            },
            _ => ModelStatus::Ready(path),
        }
    }

    /// Ensure a model is available, downloading if necessary.
    ///
    /// Returns the path to the model file.
    pub async fn ensure_model(&self, model: ModelId) -> Result<PathBuf> {
        self.ensure_model_with_progress(model, |_| {}).await
    }

    /// Like [`ensure_model`](Self::ensure_model), reporting download progress.
    pub async fn ensure_model_with_progress(
        &self,
        model: ModelId,
        on_progress: impl Fn(DownloadProgress),
    ) -> Result<PathBuf> {
        let info = model.info();
        let model_path = self.models_dir.join(&info.filename);

        match self.check_model(model).await {
            ModelStatus::Ready(path) => {
                debug!(path = %path.display(), "Model already exists");
                return Ok(path);
            }
            ModelStatus::Corrupted { expected, actual } => {
                warn!(
                    model = %model,
                    expected = expected,
                    actual = actual,
                    "Model size mismatch, re-downloading"
                );
                fs::remove_file(&model_path)
                    .await
                    .context("Failed to remove corrupted model")?;
            }
            ModelStatus::Missing => {}
        }

        download_model(&info, &model_path, &on_progress).await?;
        Ok(model_path)
    }
}

/// Stream a model from its URL into `dest`.
async fn download_model(
    info: &ModelInfo,
    dest: &Path,
    on_progress: &impl Fn(DownloadProgress),
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .context("Failed to create models directory")?;
    }

    info!(
        url = %info.url,
        dest = %dest.display(),
        "Downloading model"
    );

    let response = reqwest::get(&info.url)
        .await
        .with_context(|| format!("Failed to download model from {}", info.url))?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }

    let total = response.content_length().or(info.size_bytes);

    // Write to temporary file first, then rename (atomic)
    let temp_path = dest.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)
        .await
        .context("Failed to create temporary model file")?;

    let mut downloaded = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("Failed to read response body")?;
        file.write_all(&chunk)
            .await
            .context("Failed to write model file")?;
        downloaded += chunk.len() as u64;
        on_progress(DownloadProgress { downloaded, total });
    }
    file.sync_all().await.context("Failed to sync model file")?;
    drop(file);

    if let Some(expected) = info.size_bytes {
        if downloaded != expected {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!(
                "Downloaded model size mismatch: expected {}, got {}",
                expected,
                downloaded
            );
        }
    }

    fs::rename(&temp_path, dest)
        .await
        .context("Failed to finalize model file")?;

    info!(
        path = %dest.display(),
        size = downloaded,
        "Model downloaded successfully"
    );

    Ok(())
}

#[cfg(test)]
#[path = "models_test.rs"]
mod tests;
