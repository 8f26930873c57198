//! Streaming session: a bounded audio queue drained by a dedicated
//! transcription worker, one per connection.
//!
//! The producer never blocks. Audio goes into a bounded FIFO drained by a
//! dedicated worker thread that transcribes chunks strictly in order and
//! publishes each non-empty result as the new latest batch. Readers only
//! ever see the newest batch ("latest wins"); nothing accumulates.
//!
//! `reset` advances the session epoch. Chunks and batches from an older
//! epoch are skipped by the worker and ignored by readers, so an in-flight
//! transcription can finish without leaking into the new stream.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::audio::{AudioChunk, samples_to_seconds};
use crate::config::{OverflowPolicy, SessionConfig};
use crate::error::SessionError;
use crate::transcribe::{TranscriptSegment, TranscriptionModel};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No model loaded yet.
    Uninitialized,
    /// Accepting audio and producing partials.
    Active,
    /// Finalized; audio is rejected until reset.
    Finished,
}

/// Segments produced from one chunk, tagged with where that chunk came from.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    pub epoch: u64,
    pub arrival_time: Instant,
    /// Stream position of the chunk start; segment times are relative to it.
    pub stream_offset_seconds: f64,
    pub segments: Vec<TranscriptSegment>,
}

impl ResultBatch {
    /// Text of the last segment, the session's notion of "current" text.
    pub fn last_text(&self) -> &str {
        self.segments.last().map(|s| s.text.as_str()).unwrap_or("")
    }
}

type LatestResult = Option<Arc<ResultBatch>>;

/// Counters shared between the session and its worker.
#[derive(Default)]
struct Shared {
    epoch: AtomicU64,
    /// Chunks accepted but not yet consumed by the worker, a reset or an overflow drop.
    pending: AtomicUsize,
    /// Woken whenever `pending` decreases.
    progress: Notify,
}

impl Shared {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn consumed(&self, chunks: usize) {
        if chunks > 0 {
            self.pending.fetch_sub(chunks, Ordering::SeqCst);
            self.progress.notify_waiters();
        }
    }
}

/// Handles owned by the session for a running worker.
struct Worker {
    sender: Sender<AudioChunk>,
    /// Same queue as the worker's; used to drop the oldest chunk and to clear
    /// the backlog on reset.
    backlog: Receiver<AudioChunk>,
    results: watch::Receiver<LatestResult>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-connection streaming transcription state.
pub struct StreamingSession {
    id: u64,
    config: SessionConfig,
    state: SessionState,
    shared: Arc<Shared>,
    worker: Option<Worker>,
    /// Samples submitted since the last reset; determines stream offsets.
    samples_submitted: u64,
    dropped: u64,
}

impl StreamingSession {
    /// Create a session without a model.
    pub fn new(id: u64, config: SessionConfig) -> Self {
        Self {
            id,
            config,
            state: SessionState::Uninitialized,
            shared: Arc::new(Shared::default()),
            worker: None,
            samples_submitted: 0,
            dropped: 0,
        }
    }

    /// Create a session and start its worker with `model`.
    pub fn with_model(id: u64, config: SessionConfig, model: TranscriptionModel) -> Result<Self> {
        let mut session = Self::new(id, config);
        session.start(model)?;
        Ok(session)
    }

    /// Hand the session its model and start the worker thread.
    pub fn start(&mut self, model: TranscriptionModel) -> Result<()> {
        if self.worker.is_some() {
            anyhow::bail!("Session {} already has a worker", self.id);
        }

        let (sender, receiver) = crossbeam_channel::bounded(self.config.queue_capacity.max(1));
        let (results_tx, results_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let context = WorkerContext {
            session: self.id,
            model,
            queue: receiver.clone(),
            results: results_tx,
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
            poll: self.config.worker_poll(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("livescribe-session-{}", self.id))
            .spawn(move || context.run())
            .context("Failed to spawn transcription worker")?;

        self.worker = Some(Worker {
            sender,
            backlog: receiver,
            results: results_rx,
            cancel,
            handle,
        });
        self.state = SessionState::Active;
        debug!(session = self.id, "Session started");
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Chunks discarded because the queue was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped
    }

    /// Chunks waiting in the queue, excluding one being transcribed.
    pub fn queued_chunks(&self) -> usize {
        self.worker.as_ref().map_or(0, |w| w.backlog.len())
    }

    /// Queue a chunk of 16 kHz PCM for transcription. Never blocks.
    ///
    /// When the queue is full the overflow policy decides which chunk is
    /// dropped; that still counts as success for the caller.
    pub fn submit_chunk(&mut self, samples: Vec<i16>) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized => return Err(SessionError::NotStarted),
            SessionState::Finished => return Err(SessionError::Finished),
            SessionState::Active => {}
        }
        let worker = self.worker.as_ref().ok_or(SessionError::WorkerStopped)?;
        if worker.handle.is_finished() {
            return Err(SessionError::WorkerStopped);
        }

        let offset = samples_to_seconds(self.samples_submitted as usize);
        self.samples_submitted += samples.len() as u64;
        let chunk = AudioChunk::new(samples, offset).with_epoch(self.shared.epoch());
        trace!(session = self.id, samples = chunk.samples.len(), offset = offset, "Chunk queued");

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let chunk = match worker.sender.try_send(chunk) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => {
                self.shared.consumed(1);
                return Err(SessionError::WorkerStopped);
            }
            Err(TrySendError::Full(chunk)) => chunk,
        };

        let dropped = match self.config.overflow {
            OverflowPolicy::DropNewest => vec![chunk],
            OverflowPolicy::DropOldest => {
                send_evicting_oldest(&worker.sender, &worker.backlog, chunk)
            }
        };

        self.shared.consumed(dropped.len());
        for chunk in &dropped {
            self.dropped += 1;
            warn!(
                session = self.id,
                policy = ?self.config.overflow,
                offset = chunk.stream_offset_seconds,
                dropped = self.dropped,
                "Audio queue full, chunk dropped"
            );
        }
        Ok(())
    }

    /// Text of the newest batch, if one arrived since the last poll.
    ///
    /// Returns an empty string otherwise. Never blocks.
    pub fn poll_partial(&mut self) -> String {
        let epoch = self.shared.epoch();
        let Some(worker) = self.worker.as_mut() else {
            return String::new();
        };
        if !worker.results.has_changed().unwrap_or(false) {
            return String::new();
        }

        match worker.results.borrow_and_update().as_deref() {
            Some(batch) if batch.epoch == epoch => batch.last_text().to_string(),
            _ => String::new(),
        }
    }

    /// Newest batch of the current epoch without consuming it.
    pub fn latest(&self) -> Option<Arc<ResultBatch>> {
        let epoch = self.shared.epoch();
        let worker = self.worker.as_ref()?;
        let latest = worker.results.borrow().clone();
        latest.filter(|batch| batch.epoch == epoch)
    }

    /// Stop accepting audio and return the final text.
    ///
    /// Waits for queued and in-flight chunks, but never longer than the
    /// configured grace period. Returns an empty string if nothing was
    /// transcribed in the current epoch.
    pub async fn finish(&mut self) -> String {
        if self.state == SessionState::Active {
            self.state = SessionState::Finished;
        }
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.finish_grace();

        loop {
            let progress = self.shared.progress.notified();
            tokio::pin!(progress);
            progress.as_mut().enable();

            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, progress).await.is_err() {
                debug!(
                    session = self.id,
                    pending = self.shared.pending.load(Ordering::SeqCst),
                    "Grace period elapsed before the queue drained"
                );
                break;
            }
        }

        if let Some(worker) = self.worker.as_mut() {
            worker.results.mark_unchanged();
        }
        let text = self
            .latest()
            .map(|batch| batch.last_text().to_string())
            .unwrap_or_default();
        info!(
            session = self.id,
            waited_ms = started.elapsed().as_millis() as u64,
            chars = text.len(),
            "Session finished"
        );
        text
    }

    /// Drop the backlog and any result, and start a new stream at offset zero.
    ///
    /// Does not interrupt a transcription already running; its result is
    /// discarded.
    pub fn reset(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.samples_submitted = 0;

        if let Some(worker) = self.worker.as_mut() {
            let cleared = worker.backlog.try_iter().count();
            self.shared.consumed(cleared);
            worker.results.mark_unchanged();
            debug!(session = self.id, cleared = cleared, "Session reset");
        }
        if self.state == SessionState::Finished {
            self.state = SessionState::Active;
        }
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Blocks until an in-flight transcription returns.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.cancel();
        drop(worker.sender);
        drop(worker.backlog);
        if worker.handle.join().is_err() {
            warn!(session = self.id, "Transcription worker panicked");
        }
        debug!(session = self.id, "Session worker stopped");
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queue `chunk` after evicting the oldest queued chunk.
///
/// Returns every chunk discarded on the way: normally only the evicted one,
/// none if the worker freed a slot first, and the incoming chunk as well if
/// the queue is still full.
fn send_evicting_oldest(
    sender: &Sender<AudioChunk>,
    backlog: &Receiver<AudioChunk>,
    chunk: AudioChunk,
) -> Vec<AudioChunk> {
    let mut dropped: Vec<AudioChunk> = backlog.try_recv().into_iter().collect();
    if let Err(e) = sender.try_send(chunk) {
        dropped.push(e.into_inner());
    }
    dropped
}

/// Everything the worker thread owns.
struct WorkerContext {
    session: u64,
    model: TranscriptionModel,
    queue: Receiver<AudioChunk>,
    results: watch::Sender<LatestResult>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    poll: Duration,
}

impl WorkerContext {
    fn run(mut self) {
        debug!(session = self.session, "Transcription worker started");

        while !self.cancel.is_cancelled() {
            let chunk = match self.queue.recv_timeout(self.poll) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            self.process(chunk);
            self.shared.consumed(1);
        }

        debug!(session = self.session, "Transcription worker exiting");
    }

    fn process(&mut self, chunk: AudioChunk) {
        if chunk.epoch != self.shared.epoch() {
            trace!(session = self.session, "Skipping chunk from before reset");
            return;
        }

        let started = Instant::now();
        let segments = self.model.transcribe(&chunk.samples);
        debug!(
            session = self.session,
            samples = chunk.samples.len(),
            offset = chunk.stream_offset_seconds,
            segments = segments.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chunk transcribed"
        );

        if segments.is_empty() || chunk.epoch != self.shared.epoch() {
            return;
        }
        self.results.send_replace(Some(Arc::new(ResultBatch {
            epoch: chunk.epoch,
            arrival_time: chunk.arrival_time,
            stream_offset_seconds: chunk.stream_offset_seconds,
            segments,
        })));
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
