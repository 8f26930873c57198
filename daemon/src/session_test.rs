use super::*;
use crate::testing::StubTranscriber;
use std::time::Duration;

fn config() -> SessionConfig {
    SessionConfig {
        finish_grace_ms: 500,
        worker_poll_ms: 10,
        queue_capacity: 16,
        overflow: OverflowPolicy::DropOldest,
    }
}

fn session_with(stub: &StubTranscriber, config: SessionConfig) -> StreamingSession {
    StreamingSession::with_model(1, config, stub.model()).unwrap()
}

fn speech(len: usize) -> Vec<i16> {
    vec![1000; len]
}

/// Poll until `cond` holds or `timeout` elapses.
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn wait_for_partial(session: &mut StreamingSession) -> String {
    let mut text = String::new();
    wait_until(Duration::from_secs(5), || {
        text = session.poll_partial();
        !text.is_empty()
    });
    text
}

#[test]
fn test_poll_without_chunks_is_empty_and_fast() {
    let stub = StubTranscriber::new();
    let mut uninitialized = StreamingSession::new(1, config());
    let mut active = session_with(&stub, config());

    let start = Instant::now();
    assert_eq!(uninitialized.poll_partial(), "");
    assert_eq!(active.poll_partial(), "");
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_new_session_is_uninitialized() {
    let mut session = StreamingSession::new(7, config());
    assert_eq!(session.id(), 7);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.submit_chunk(speech(10)), Err(SessionError::NotStarted));

    session.start(StubTranscriber::new().model()).unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert!(session.start(StubTranscriber::new().model()).is_err());
}

#[test]
fn test_chunks_transcribed_in_submission_order() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    for len in [100, 200, 300] {
        session.submit_chunk(speech(len)).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || stub.calls() == 3));
    let lengths: Vec<usize> = stub.inputs().iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![100, 200, 300]);
}

#[test]
fn test_poll_returns_latest_once() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(1600)).unwrap();
    assert_eq!(wait_for_partial(&mut session), "chunk-1600");
    assert_eq!(session.poll_partial(), "");

    session.submit_chunk(speech(800)).unwrap();
    assert_eq!(wait_for_partial(&mut session), "chunk-800");
}

#[test]
fn test_silent_chunk_is_not_published() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.submit_chunk(vec![0; 1600]).unwrap();
    assert!(wait_until(Duration::from_millis(200), || session.queued_chunks() == 0));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(session.poll_partial(), "");
    assert!(session.latest().is_none());
    assert_eq!(stub.calls(), 0);
}

#[test]
fn test_reset_clears_processed_results() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(1600)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || session.latest().is_some()));

    session.reset();
    assert_eq!(session.poll_partial(), "");
    assert!(session.latest().is_none());
    assert_eq!(session.state(), SessionState::Active);
}

#[test]
fn test_reset_discards_backlog() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(200));
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(100)).unwrap();
    assert!(wait_until(Duration::from_secs(1), || session.queued_chunks() == 0));
    session.submit_chunk(speech(200)).unwrap();
    session.submit_chunk(speech(300)).unwrap();
    assert_eq!(session.queued_chunks(), 2);

    session.reset();
    assert_eq!(session.queued_chunks(), 0);

    std::thread::sleep(Duration::from_millis(400));
    // Only the chunk already in flight reached the backend
    assert_eq!(stub.calls(), 1);
    assert_eq!(session.poll_partial(), "");
}

#[tokio::test]
async fn test_reset_during_inflight_transcription() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(200));
    let mut session = session_with(
        &stub,
        SessionConfig {
            finish_grace_ms: 3000,
            ..config()
        },
    );

    session.submit_chunk(speech(100)).unwrap();
    assert!(wait_until(Duration::from_secs(1), || session.queued_chunks() == 0));
    session.reset();
    session.submit_chunk(speech(200)).unwrap();

    assert_eq!(session.finish().await, "chunk-200");
    let lengths: Vec<usize> = stub.inputs().iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![100, 200]);
}

#[tokio::test]
async fn test_finish_without_chunks_returns_empty_quickly() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    let start = Instant::now();
    assert_eq!(session.finish().await, "");
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(session.state(), SessionState::Finished);
}

#[tokio::test]
async fn test_finish_on_uninitialized_session() {
    let mut session = StreamingSession::new(1, config());
    assert_eq!(session.finish().await, "");
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn test_finish_waits_for_inflight_chunk() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(100));
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(1600)).unwrap();
    let start = Instant::now();
    assert_eq!(session.finish().await, "chunk-1600");
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_finish_returns_after_grace_period() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(800));
    let mut session = session_with(
        &stub,
        SessionConfig {
            finish_grace_ms: 100,
            ..config()
        },
    );

    session.submit_chunk(speech(1600)).unwrap();
    let start = Instant::now();
    assert_eq!(session.finish().await, "");
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600));
}

#[tokio::test]
async fn test_finish_returns_polled_text_again() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(1600)).unwrap();
    assert_eq!(wait_for_partial(&mut session), "chunk-1600");
    assert_eq!(session.finish().await, "chunk-1600");
}

#[tokio::test]
async fn test_trailing_silence_keeps_last_text() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(1600)).unwrap();
    session.submit_chunk(vec![0; 1600]).unwrap();
    assert_eq!(session.finish().await, "chunk-1600");
}

#[tokio::test]
async fn test_audio_rejected_after_finish_until_reset() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.finish().await;
    assert_eq!(session.submit_chunk(speech(10)), Err(SessionError::Finished));

    session.reset();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.submit_chunk(speech(10)), Ok(()));
}

#[tokio::test]
async fn test_stream_offsets_restart_after_reset() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(1600)).unwrap();
    session.submit_chunk(speech(3200)).unwrap();
    session.finish().await;
    let batch = session.latest().unwrap();
    assert_eq!(batch.stream_offset_seconds, 0.1);
    assert_eq!(batch.last_text(), "chunk-3200");

    session.reset();
    session.submit_chunk(speech(800)).unwrap();
    session.finish().await;
    let batch = session.latest().unwrap();
    assert_eq!(batch.stream_offset_seconds, 0.0);
    assert!(batch.arrival_time <= Instant::now());
}

#[tokio::test]
async fn test_drop_newest_discards_incoming_chunk() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(100));
    let mut session = session_with(
        &stub,
        SessionConfig {
            finish_grace_ms: 3000,
            queue_capacity: 2,
            overflow: OverflowPolicy::DropNewest,
            ..config()
        },
    );

    session.submit_chunk(speech(100)).unwrap();
    assert!(wait_until(Duration::from_secs(1), || session.queued_chunks() == 0));
    for len in [200, 300, 400] {
        session.submit_chunk(speech(len)).unwrap();
    }
    assert_eq!(session.dropped_chunks(), 1);

    assert_eq!(session.finish().await, "chunk-300");
    let lengths: Vec<usize> = stub.inputs().iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![100, 200, 300]);
}

#[tokio::test]
async fn test_drop_oldest_discards_queued_chunk() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(100));
    let mut session = session_with(
        &stub,
        SessionConfig {
            finish_grace_ms: 3000,
            queue_capacity: 2,
            overflow: OverflowPolicy::DropOldest,
            ..config()
        },
    );

    session.submit_chunk(speech(100)).unwrap();
    assert!(wait_until(Duration::from_secs(1), || session.queued_chunks() == 0));
    for len in [200, 300, 400] {
        session.submit_chunk(speech(len)).unwrap();
    }
    assert_eq!(session.dropped_chunks(), 1);

    assert_eq!(session.finish().await, "chunk-400");
    let lengths: Vec<usize> = stub.inputs().iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![100, 300, 400]);
}

fn offsets(chunks: &[AudioChunk]) -> Vec<f64> {
    chunks.iter().map(|c| c.stream_offset_seconds).collect()
}

#[test]
fn test_eviction_makes_room_for_incoming_chunk() {
    let (sender, queue) = crossbeam_channel::bounded(1);
    sender.try_send(AudioChunk::new(vec![0; 10], 0.0)).unwrap();

    let dropped = send_evicting_oldest(&sender, &queue, AudioChunk::new(vec![0; 10], 1.0));

    assert_eq!(offsets(&dropped), vec![0.0]);
    assert_eq!(queue.try_recv().unwrap().stream_offset_seconds, 1.0);
}

#[test]
fn test_eviction_reports_every_discarded_chunk() {
    let (sender, _queue) = crossbeam_channel::bounded(1);
    sender.try_send(AudioChunk::new(vec![0; 10], 0.0)).unwrap();

    // Nothing to evict, queue still full: only the incoming chunk goes
    let (_, empty) = crossbeam_channel::bounded::<AudioChunk>(1);
    let dropped = send_evicting_oldest(&sender, &empty, AudioChunk::new(vec![0; 10], 1.0));
    assert_eq!(offsets(&dropped), vec![1.0]);

    // Evicted chunk does not free this queue: both are reported
    let (other_sender, other) = crossbeam_channel::bounded(1);
    other_sender.try_send(AudioChunk::new(vec![0; 10], 0.5)).unwrap();
    let dropped = send_evicting_oldest(&sender, &other, AudioChunk::new(vec![0; 10], 2.0));
    assert_eq!(offsets(&dropped), vec![0.5, 2.0]);
}

#[test]
fn test_failed_transcription_keeps_session_alive() {
    let stub = StubTranscriber::new().failing();
    let mut session = session_with(&stub, config());

    session.submit_chunk(speech(1600)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || stub.calls() == 1));
    assert_eq!(session.poll_partial(), "");
    assert_eq!(session.submit_chunk(speech(1600)), Ok(()));
}

#[test]
fn test_submit_after_shutdown_fails() {
    let stub = StubTranscriber::new();
    let mut session = session_with(&stub, config());

    session.shutdown();
    assert_eq!(
        session.submit_chunk(speech(10)),
        Err(SessionError::WorkerStopped)
    );
    assert_eq!(session.poll_partial(), "");
}
