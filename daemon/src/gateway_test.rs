use super::*;
use crate::models::ModelSize;
use crate::testing::{StubLoader, StubTranscriber};
use std::time::{Duration, Instant};

fn gateway(loader: Arc<StubLoader>) -> SessionGateway {
    SessionGateway::new(
        1,
        loader,
        ModelConfig::default(),
        SessionConfig {
            worker_poll_ms: 10,
            ..SessionConfig::default()
        },
    )
}

async fn ready_gateway(transcriber: StubTranscriber) -> SessionGateway {
    let mut gateway = gateway(Arc::new(StubLoader::new(transcriber)));
    gateway.initialize(&ConnectParams::default()).await.unwrap();
    gateway
}

fn audio(samples: Vec<i16>) -> String {
    ClientMessage::Audio { audio: samples }.encode().unwrap()
}

fn is_error(reply: &Option<ServerMessage>) -> bool {
    matches!(reply, Some(ServerMessage::Error { .. }))
}

#[tokio::test]
async fn test_initialize_uses_default_language_and_model() {
    let loader = Arc::new(StubLoader::default());
    let mut gateway = gateway(Arc::clone(&loader));
    assert_eq!(gateway.state(), GatewayState::Connecting);

    let reply = gateway.initialize(&ConnectParams::default()).await.unwrap();
    assert_eq!(reply.kind(), "initialized");
    assert_eq!(gateway.state(), GatewayState::Initialized);
    assert!(gateway.session().is_some());

    let requests = loader.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].language.as_deref(), Some("en"));
    assert_eq!(requests[0].size, ModelSize::Base);
}

#[tokio::test]
async fn test_initialize_failure_creates_no_session() {
    let mut gateway = gateway(Arc::new(StubLoader::rejecting()));

    let err = gateway.initialize(&ConnectParams::default()).await.unwrap_err();
    assert!(matches!(err, LoadError::Unavailable(_)));
    assert_eq!(gateway.state(), GatewayState::Connecting);
    assert!(gateway.session().is_none());
}

#[tokio::test]
async fn test_unknown_model_never_reaches_loader() {
    let loader = Arc::new(StubLoader::default());
    let mut gateway = gateway(Arc::clone(&loader));
    let params = ConnectParams {
        model: Some("enormous".to_string()),
        ..ConnectParams::default()
    };

    let err = gateway.initialize(&params).await.unwrap_err();
    assert!(matches!(err, LoadError::UnknownModelSize(_)));
    assert!(loader.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_silence_then_stop_yields_empty_final() {
    let mut gateway = ready_gateway(StubTranscriber::new()).await;

    assert_eq!(gateway.handle_text(&audio(vec![0; 1600])).await, None);
    assert_eq!(gateway.state(), GatewayState::Streaming);

    let reply = gateway.handle_text(r#"{"type":"stop"}"#).await;
    assert_eq!(
        reply,
        Some(ServerMessage::FinalTranscription {
            text: String::new()
        })
    );
    assert_eq!(gateway.state(), GatewayState::Stopped);
}

#[tokio::test]
async fn test_malformed_message_keeps_connection_usable() {
    let mut gateway = ready_gateway(StubTranscriber::new()).await;

    let reply = gateway.handle_text("this is not json").await;
    assert!(is_error(&reply));

    let reply = gateway.handle_text(r#"{"type":"reset"}"#).await;
    assert_eq!(reply.map(|m| m.kind()), Some("reset"));
}

#[tokio::test]
async fn test_invalid_payloads_are_errors() {
    let mut gateway = ready_gateway(StubTranscriber::new()).await;

    for payload in [
        r#"{"type":"pause"}"#,
        r#"{"type":"audio","audio":"loud"}"#,
        r#"{"type":"audio","audio":[1,2,40000]}"#,
        r#"{"type":"audio"}"#,
        r#"{"audio":[1,2,3]}"#,
        "[]",
    ] {
        let reply = gateway.handle_text(payload).await;
        assert!(is_error(&reply), "expected error for {payload}");
    }
    assert_eq!(gateway.session().map(|s| s.queued_chunks()), Some(0));
}

#[tokio::test]
async fn test_partial_surfaces_on_next_audio() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(20));
    let mut gateway = ready_gateway(stub).await;

    assert_eq!(gateway.handle_text(&audio(vec![500; 1600])).await, None);

    let deadline = Instant::now() + Duration::from_secs(5);
    while gateway.session().and_then(|s| s.latest()).is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let reply = gateway.handle_text(&audio(vec![0; 800])).await;
    assert_eq!(
        reply,
        Some(ServerMessage::Transcription {
            text: "chunk-1600".to_string()
        })
    );
}

#[tokio::test]
async fn test_stop_returns_latest_text() {
    let mut gateway = ready_gateway(StubTranscriber::new()).await;

    gateway.handle_text(&audio(vec![500; 3200])).await;
    let reply = gateway.handle_text(r#"{"type":"stop"}"#).await;
    assert_eq!(
        reply,
        Some(ServerMessage::FinalTranscription {
            text: "chunk-3200".to_string()
        })
    );
}

#[tokio::test]
async fn test_audio_after_stop_rejected_until_reset() {
    let mut gateway = ready_gateway(StubTranscriber::new()).await;

    gateway.handle_text(r#"{"type":"stop"}"#).await;
    assert!(is_error(&gateway.handle_text(&audio(vec![0; 160])).await));

    let reply = gateway.handle_text(r#"{"type":"reset"}"#).await;
    assert_eq!(
        reply,
        Some(ServerMessage::Reset {
            message: "Session reset".to_string()
        })
    );
    assert_eq!(gateway.state(), GatewayState::Streaming);
    assert_eq!(gateway.handle_text(&audio(vec![0; 160])).await, None);
}

#[tokio::test]
async fn test_messages_before_initialize_are_errors() {
    let mut gateway = gateway(Arc::new(StubLoader::default()));
    assert!(is_error(&gateway.handle_text(r#"{"type":"stop"}"#).await));
}

#[tokio::test]
async fn test_binary_frames_are_errors() {
    let gateway = ready_gateway(StubTranscriber::new()).await;
    assert_eq!(gateway.handle_binary().kind(), "error");
}

#[tokio::test]
async fn test_close_joins_worker() {
    let stub = StubTranscriber::new().with_delay(Duration::from_millis(50));
    let mut gateway = ready_gateway(stub.clone()).await;

    gateway.handle_text(&audio(vec![500; 1600])).await;
    gateway.close().await;
    // The worker exits after the chunk in flight, if it had picked one up
    assert!(stub.calls() <= 1);
}
