//! Streaming a WAV file through a daemon session.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use livescribe_common::client::{self, Client};
use livescribe_common::protocol::{ClientMessage, SAMPLE_RATE, ServerMessage};
use tracing::debug;

use crate::{ConnectArgs, INIT_TIMEOUT};

/// How long to wait for `final_transcription` after `stop`.
const FINAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub chunk_ms: u32,
    pub realtime: bool,
}

/// Load a 16 kHz mono 16-bit PCM WAV file.
pub fn load_wav(path: &Path) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();

    if spec.sample_rate != SAMPLE_RATE {
        bail!(
            "WAV must be {} Hz, got {} Hz; resample before streaming",
            SAMPLE_RATE,
            spec.sample_rate
        );
    }
    if spec.channels != 1 {
        bail!("WAV must be mono, got {} channels", spec.channels);
    }
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!("WAV must be 16-bit integer PCM");
    }

    reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read WAV samples")
}

/// Split `samples` into chunks of `chunk_ms` milliseconds.
pub fn chunk_samples(samples: &[i16], chunk_ms: u32) -> std::slice::Chunks<'_, i16> {
    let size = (SAMPLE_RATE as usize * chunk_ms as usize / 1000).max(1);
    samples.chunks(size)
}

/// Stream a file and return the final transcription. Partials go to stderr.
pub async fn stream_file(path: &Path, connect: &ConnectArgs, options: &StreamOptions) -> Result<String> {
    let samples = load_wav(path)?;
    let mut client = client::connect(&connect.url, &connect.params()).await?;

    match client.recv_timeout(INIT_TIMEOUT).await? {
        Some(ServerMessage::Initialized { message }) => eprintln!("{message}"),
        Some(ServerMessage::Error { message }) => bail!("Daemon rejected the session: {message}"),
        Some(other) => bail!("Unexpected first message: {}", other.kind()),
        None => bail!("No response from daemon"),
    }

    let pace = Duration::from_millis(options.chunk_ms as u64);
    for chunk in chunk_samples(&samples, options.chunk_ms) {
        client
            .send(&ClientMessage::Audio {
                audio: chunk.to_vec(),
            })
            .await?;
        drain_replies(&mut client).await?;
        if options.realtime {
            tokio::time::sleep(pace).await;
        }
    }

    client.send(&ClientMessage::Stop).await?;
    let text = loop {
        match client.recv_timeout(FINAL_TIMEOUT).await? {
            Some(ServerMessage::FinalTranscription { text }) => break text,
            Some(message) => report(&message),
            None => bail!("Timed out waiting for the final transcription"),
        }
    };

    client.close().await?;
    Ok(text)
}

/// Print whatever the daemon has sent so far without waiting.
async fn drain_replies(client: &mut Client) -> Result<()> {
    while let Some(message) = client.recv_timeout(Duration::from_millis(1)).await? {
        report(&message);
    }
    Ok(())
}

fn report(message: &ServerMessage) {
    match message {
        ServerMessage::Transcription { text } => eprintln!("... {text}"),
        ServerMessage::Error { message } => eprintln!("error: {message}"),
        other => debug!(kind = other.kind(), "Ignoring message"),
    }
}
