//! Model status listing and downloads.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use livescribe_daemon::config::Config;
use livescribe_daemon::models::{DownloadProgress, ModelId, ModelManager, ModelSize, ModelStatus};

pub async fn run(download: bool) -> Result<()> {
    let manager = ModelManager::new()?;

    if download {
        let config = Config::load().context("Failed to load config")?;
        let size = ModelSize::parse(&config.model.size)?;
        for model in [ModelId::Whisper(size), ModelId::SileroVad] {
            let path = fetch(&manager, model).await?;
            println!("{model}: {}", path.display());
        }
        return Ok(());
    }

    println!("Models in {}", manager.models_dir().display());
    let models = std::iter::once(ModelId::SileroVad).chain(ModelSize::ALL.map(ModelId::Whisper));
    for model in models {
        let status = manager.check_model(model).await;
        println!("  {:<24} {}", model.to_string(), describe(&status));
    }
    Ok(())
}

fn describe(status: &ModelStatus) -> String {
    match status {
        ModelStatus::Ready(_) => "ready".to_string(),
        ModelStatus::Missing => "missing".to_string(),
        ModelStatus::Corrupted { expected, actual } => {
            format!("corrupted ({actual} of {expected} bytes)")
        }
    }
}

async fn fetch(manager: &ModelManager, model: ModelId) -> Result<std::path::PathBuf> {
    let bar = ProgressBar::hidden();
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );
    bar.set_message(model.to_string());

    let path = manager
        .ensure_model_with_progress(model, |progress: DownloadProgress| {
            if bar.is_hidden() {
                bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            }
            if let Some(total) = progress.total {
                bar.set_length(total);
            }
            bar.set_position(progress.downloaded);
        })
        .await
        .with_context(|| format!("Failed to download {model}"))?;

    bar.finish_and_clear();
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_status() {
        assert_eq!(describe(&ModelStatus::Missing), "missing");
        assert_eq!(
            describe(&ModelStatus::Ready(std::path::PathBuf::from("/m"))),
            "ready"
        );
        assert_eq!(
            describe(&ModelStatus::Corrupted {
                expected: 10,
                actual: 4
            }),
            "corrupted (4 of 10 bytes)"
        );
    }
}
