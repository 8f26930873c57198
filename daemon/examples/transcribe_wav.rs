//! Run a WAV file through a streaming session without the server.
//!
//! Run with: cargo run -p livescribe-daemon --example transcribe_wav -- speech.wav [model] [language]
//!
//! The file must be 16 kHz mono 16-bit PCM. Models are downloaded on first use.
//!
//! Set RUST_LOG for debug output:
//!   RUST_LOG=livescribe_daemon=debug - per-chunk timing and VAD decisions

use std::sync::Arc;

use anyhow::{Context, bail};
use livescribe_common::protocol::ConnectParams;
use livescribe_daemon::config::Config;
use livescribe_daemon::models::ModelManager;
use livescribe_daemon::session::StreamingSession;
use livescribe_daemon::transcribe::{ModelLoader, ModelRequest, WhisperLoader};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

/// Audio per submitted chunk: one second.
const CHUNK_SAMPLES: usize = 16000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: transcribe_wav <file.wav> [model] [language]");
    };
    let params = ConnectParams {
        model: args.next(),
        language: args.next(),
        task: None,
    };

    let mut reader = hound::WavReader::open(&path).context("Failed to open WAV file")?;
    let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;

    let config = Config::load()?;
    let request = ModelRequest::resolve(&params, &config.model)?;
    println!("Model: {}  Language: {:?}", request.size, request.language);

    let loader = Arc::new(WhisperLoader::new(
        ModelManager::new()?,
        config.vad.clone(),
        config.model.threads,
        Handle::current(),
    ));
    let model = tokio::task::spawn_blocking(move || loader.load(&request)).await??;
    let mut session = StreamingSession::with_model(1, config.session.clone(), model)?;

    for chunk in samples.chunks(CHUNK_SAMPLES) {
        session.submit_chunk(chunk.to_vec())?;
        let partial = session.poll_partial();
        if !partial.is_empty() {
            println!("... {partial}");
        }
        // Feed at roughly real-time speed
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    println!(">>> {}", session.finish().await);
    tokio::task::spawn_blocking(move || drop(session)).await?;
    Ok(())
}
