//! `lsctl`: command line client for the livescribe daemon.

mod models;
mod stream;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use livescribe_common::client::{self, DEFAULT_URL};
use livescribe_common::protocol::{ClientMessage, ConnectParams, SAMPLE_RATE, ServerMessage};
use livescribe_daemon::config::Config;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub use stream::{StreamOptions, chunk_samples, load_wav};

/// How long to wait for the daemon to load a model, which may include a download.
const INIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Parser)]
#[command(name = "lsctl")]
#[command(about = "livescribe CLI - streaming speech transcription")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Open a session and send a short burst of silence
    Check(ConnectArgs),
    /// Stream a 16 kHz mono WAV file and print the transcription
    Stream {
        /// WAV file to send
        path: PathBuf,
        /// Audio per message, in milliseconds
        #[arg(long, default_value_t = 100)]
        chunk_ms: u32,
        /// Pace chunks at real-time speed
        #[arg(long)]
        realtime: bool,
        #[command(flatten)]
        connect: ConnectArgs,
    },
    /// Show which model files are present
    Models {
        /// Download the configured Whisper model and the VAD model
        #[arg(long)]
        download: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

/// Where and how to connect.
#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
    /// Daemon WebSocket URL
    #[arg(long, default_value = DEFAULT_URL)]
    pub url: String,
    /// Spoken language, or "auto"
    #[arg(long)]
    pub language: Option<String>,
    /// Model size, e.g. "base" or "small.en"
    #[arg(long)]
    pub model: Option<String>,
    /// "transcribe" or "translate"
    #[arg(long)]
    pub task: Option<String>,
}

impl ConnectArgs {
    pub fn params(&self) -> ConnectParams {
        ConnectParams {
            language: self.language.clone(),
            model: self.model.clone(),
            task: self.task.clone(),
        }
    }
}

/// Entry point for the CLI process.
pub async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    execute(Cli::parse()).await
}

/// Run one parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Check(connect) => check(&connect).await,
        Commands::Stream {
            path,
            chunk_ms,
            realtime,
            connect,
        } => {
            let options = StreamOptions { chunk_ms, realtime };
            let text = stream::stream_file(&path, &connect, &options).await?;
            println!("{text}");
            Ok(())
        }
        Commands::Models { download } => models::run(download).await,
        Commands::Config { init } => config(init),
    }
}

/// Connect, expect `initialized`, send 0.1 s of silence and report.
async fn check(connect: &ConnectArgs) -> Result<()> {
    let mut client = client::connect(&connect.url, &connect.params()).await?;

    match client.recv_timeout(INIT_TIMEOUT).await? {
        Some(ServerMessage::Initialized { message }) => println!("Connected: {message}"),
        Some(ServerMessage::Error { message }) => bail!("Daemon rejected the session: {message}"),
        Some(other) => bail!("Unexpected first message: {}", other.kind()),
        None => bail!("No response from daemon"),
    }

    let silence = vec![0i16; SAMPLE_RATE as usize / 10];
    client.send(&ClientMessage::Audio { audio: silence }).await?;
    match client.recv_timeout(Duration::from_secs(5)).await? {
        None => println!("No reply to silence (expected)"),
        Some(ServerMessage::Error { message }) => bail!("Daemon reported an error: {message}"),
        Some(other) => println!("Reply to silence: {}", other.kind()),
    }

    client.close().await?;
    println!("Daemon OK");
    Ok(())
}

fn config(init: bool) -> Result<()> {
    let path = Config::config_path()?;
    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::default().save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    let config = Config::load().context("Failed to load config")?;
    println!("# {}", path.display());
    print!("{}", config.to_toml()?);
    Ok(())
}
