mod common;

use base64::{Engine, engine::general_purpose::STANDARD};
use common::{VendorSide, WAIT, fake_vendor, next_event};
use duplex_core::{
    AdapterError, RealtimeAdapter, SessionEvent, SessionState, ToolDeclaration, ToolResult,
    tools::{ToolRegistry, execute_tool_call},
};
use duplex_realtime::{
    AdapterConfig, GeminiAdapter, GlmAdapter, Provider, QwenAdapter, connect_provider,
};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::{
    net::TcpListener,
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

fn pcm16_base64(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

fn config(url: &str) -> AdapterConfig {
    AdapterConfig::new("test-key").with_endpoint(url)
}

/// Connects `adapter` while the vendor runs the `session.created` /
/// `session.updated` exchange.
async fn handshake<A: RealtimeAdapter + ?Sized>(
    adapter: &mut A,
    accepted: oneshot::Receiver<VendorSide>,
) -> VendorSide {
    let vendor = async {
        let mut vendor = accepted.await.unwrap();
        vendor.accept_session().await;
        vendor
    };
    let (connected, vendor) = tokio::join!(adapter.connect(), vendor);
    connected.unwrap();
    vendor
}

#[tokio::test]
async fn test_qwen_handshake_reaches_ready() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = QwenAdapter::new(config(&url).with_instructions("Be brief."));
    assert_eq!(adapter.state(), SessionState::Idle);

    let vendor = async {
        let mut vendor = accepted.await.unwrap();
        vendor.accept_session().await
    };
    let (connected, update) = tokio::join!(adapter.connect(), vendor);

    connected.unwrap();
    assert_eq!(adapter.state(), SessionState::Ready);
    assert_eq!(update["session"]["instructions"], "Be brief.");
    assert_eq!(update["session"]["voice"], "Cherry");
    assert_eq!(update["session"]["output_audio_format"], "pcm24");
}

#[tokio::test]
async fn test_glm_flush_sends_wav_wrapped_concatenation() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = GlmAdapter::new(config(&url));
    let mut vendor = handshake(&mut adapter, accepted).await;

    adapter.send_audio(&pcm16_base64(&[1, 2]));
    adapter.send_audio(&pcm16_base64(&[3, 4]));

    // Both chunks normally share one flush; a tick between them splits them
    let mut pcm = Vec::new();
    while pcm.len() < 8 {
        let frame = vendor.recv_json().await;
        assert_eq!(frame["type"], "input_audio_buffer.append");
        assert!(frame["client_timestamp"].is_i64());
        let wav = STANDARD.decode(frame["audio"].as_str().unwrap()).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16_000);
        pcm.extend_from_slice(&wav[44..]);
    }
    assert_eq!(pcm, [1, 0, 2, 0, 3, 0, 4, 0]);
}

#[tokio::test]
async fn test_idle_session_sends_no_empty_frames() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = QwenAdapter::new(config(&url));
    let mut vendor = handshake(&mut adapter, accepted).await;

    assert!(vendor.recv_within(Duration::from_millis(600)).await.is_none());
}

#[tokio::test]
async fn test_streamed_tool_call_round_trip() {
    let (url, accepted) = fake_vendor().await;
    let mut registry = ToolRegistry::default();
    registry.register(
        ToolDeclaration {
            name: "add".into(),
            description: "Adds two integers".into(),
            parameters: json!({"type": "object"}),
        },
        |args: Value| async move {
            let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
            Ok::<_, anyhow::Error>(json!({"sum": sum}))
        },
    );
    let mut adapter = QwenAdapter::new(config(&url).with_tools(registry.declarations()));
    let mut events = adapter.take_events().unwrap();
    let mut vendor = handshake(&mut adapter, accepted).await;

    vendor
        .send_json(json!({
            "type": "response.function_call_arguments.delta",
            "delta": "{\"a\": 2,",
            "name": "add",
            "call_id": "call_1"
        }))
        .await;
    vendor
        .send_json(json!({"type": "response.function_call_arguments.delta", "delta": " \"b\": 40}"}))
        .await;
    vendor
        .send_json(json!({"type": "response.function_call_arguments.done", "call_id": "call_1"}))
        .await;

    let SessionEvent::ToolCall(call) = next_event(&mut events).await else {
        panic!("expected a tool call");
    };
    assert_eq!(call.function_calls.len(), 1);
    assert_eq!(call.function_calls[0].name, "add");
    assert_eq!(call.function_calls[0].id, "call_1");
    assert_eq!(call.function_calls[0].args, json!({"a": 2, "b": 40}));

    let mut results = execute_tool_call(&registry, &call).await;
    results.push(ToolResult {
        id: "call_0".into(),
        name: None,
        response: json!({"status": "late"}),
    });
    adapter.send_tool_response(results);

    let first = vendor.recv_json().await;
    assert_eq!(first["type"], "conversation.item.create");
    assert_eq!(first["item"]["type"], "function_call_output");
    assert_eq!(first["item"]["call_id"], "call_1");
    let output: Value = serde_json::from_str(first["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output, json!({"sum": 42}));

    let second = vendor.recv_json().await;
    assert_eq!(second["type"], "conversation.item.create");
    assert_eq!(second["item"]["call_id"], "call_0");

    let last = vendor.recv_json().await;
    assert_eq!(last["type"], "response.create");
}

#[tokio::test]
async fn test_barge_in_and_turn_complete() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = QwenAdapter::new(config(&url));
    let mut events = adapter.take_events().unwrap();
    let mut vendor = handshake(&mut adapter, accepted).await;

    let pcm24 = STANDARD.encode([0x11, 0x22, 0x33, 0xAA, 0xBB, 0xCC]);
    vendor
        .send_json(json!({"type": "response.audio.delta", "delta": pcm24}))
        .await;
    vendor
        .send_json(json!({"type": "input_audio_buffer.speech_started"}))
        .await;
    vendor
        .send_json(json!({"type": "input_audio_buffer.speech_started"}))
        .await;
    vendor.send_json(json!({"type": "response.done"})).await;

    let SessionEvent::Audio(audio) = next_event(&mut events).await else {
        panic!("expected audio");
    };
    assert_eq!(STANDARD.decode(audio).unwrap(), [0x22, 0x33, 0xBB, 0xCC]);
    assert!(matches!(next_event(&mut events).await, SessionEvent::Interrupted));
    // The second speech start finds the model silent and raises nothing
    assert!(matches!(next_event(&mut events).await, SessionEvent::TurnComplete));
}

#[tokio::test]
async fn test_vendor_error_is_emitted() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = GlmAdapter::new(config(&url));
    let mut events = adapter.take_events().unwrap();
    let mut vendor = handshake(&mut adapter, accepted).await;

    vendor
        .send_json(json!({"type": "error", "error": {"message": "rate limited"}}))
        .await;

    match next_event(&mut events).await {
        SessionEvent::Error(AdapterError::Vendor(message)) => assert_eq!(message, "rate limited"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(adapter.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_handshake_timeout_closes_transport() {
    let (url, accepted) = fake_vendor().await;
    let timeout = Duration::from_millis(200);
    let mut adapter = QwenAdapter::new(config(&url).with_handshake_timeout(timeout));
    let mut events = adapter.take_events().unwrap();

    match adapter.connect().await {
        Err(AdapterError::HandshakeTimeout(waited)) => assert_eq!(waited, timeout),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(adapter.state(), SessionState::Closed);

    let mut vendor = accepted.await.unwrap();
    let frame = vendor.recv_close().await.unwrap();
    assert_eq!(frame.code, CloseCode::Normal);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_close_before_ready_reports_code() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = QwenAdapter::new(config(&url));

    let vendor = async {
        let mut vendor = accepted.await.unwrap();
        vendor.close(CloseCode::Policy, "API Key is required").await;
        vendor
    };
    let (connected, _vendor) = tokio::join!(adapter.connect(), vendor);

    match connected {
        Err(AdapterError::ClosedBeforeReady { code, reason }) => {
            assert_eq!(code, 1008);
            assert_eq!(reason, "API Key is required");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(adapter.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_remote_close_after_ready_emits_closed() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = QwenAdapter::new(config(&url));
    let mut events = adapter.take_events().unwrap();
    let mut vendor = handshake(&mut adapter, accepted).await;

    vendor.close(CloseCode::Normal, "bye").await;

    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed));
    assert_eq!(adapter.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_dropped_connection_after_ready_reports_error_then_closed() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = QwenAdapter::new(config(&url));
    let mut events = adapter.take_events().unwrap();
    let vendor = handshake(&mut adapter, accepted).await;

    // No close frame: the TCP stream just goes away
    drop(vendor);

    match next_event(&mut events).await {
        SessionEvent::Error(AdapterError::Transport(_)) => {}
        other => panic!("expected a transport error, got {other:?}"),
    }
    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed));
    assert_eq!(adapter.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_stalled_vendor_cannot_block_disconnect() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter =
        QwenAdapter::new(config(&url).with_write_timeout(Duration::from_millis(300)));
    let mut events = adapter.take_events().unwrap();
    // Completes the handshake, then never reads again
    let _vendor = handshake(&mut adapter, accepted).await;

    let chunk = STANDARD.encode(vec![0x11u8; 4 * 1024 * 1024]);
    for _ in 0..16 {
        if adapter.state() == SessionState::Closed {
            break;
        }
        adapter.send_audio(&chunk);
        sleep(Duration::from_millis(250)).await;
    }

    timeout(WAIT, adapter.disconnect())
        .await
        .expect("disconnect hung on a vendor that stopped reading");
    assert_eq!(adapter.state(), SessionState::Closed);

    match next_event(&mut events).await {
        SessionEvent::Error(AdapterError::Transport(reason)) => {
            assert!(reason.contains("stalled"), "unexpected reason: {reason}");
        }
        other => panic!("expected a stalled write, got {other:?}"),
    }
    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed));
}

#[tokio::test]
async fn test_watch_state_follows_the_handshake() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = QwenAdapter::new(config(&url));
    let mut states = adapter.watch_state();
    assert_eq!(*states.borrow(), SessionState::Idle);

    let vendor = async {
        let mut vendor = accepted.await.unwrap();
        states
            .wait_for(|s| *s == SessionState::Connecting)
            .await
            .unwrap();
        vendor
            .send_json(json!({"type": "session.created", "session": {"id": "sess_1"}}))
            .await;
        assert_eq!(vendor.recv_json().await["type"], "session.update");
        states
            .wait_for(|s| *s == SessionState::AwaitingHandshakeAck)
            .await
            .unwrap();
        vendor
            .send_json(json!({"type": "session.updated", "session": {"id": "sess_1"}}))
            .await;
        vendor
    };
    let (connected, _vendor) = tokio::join!(adapter.connect(), vendor);
    connected.unwrap();
    assert_eq!(*states.borrow(), SessionState::Ready);

    adapter.disconnect().await;
    assert_eq!(*states.borrow(), SessionState::Closed);
}

#[tokio::test]
async fn test_disconnect_closes_and_adapter_is_single_use() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = GlmAdapter::new(config(&url));
    let mut events = adapter.take_events().unwrap();
    let mut vendor = handshake(&mut adapter, accepted).await;

    adapter.disconnect().await;

    assert_eq!(adapter.state(), SessionState::Closed);
    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed));
    let frame = vendor.recv_close().await.unwrap();
    assert_eq!(frame.code, CloseCode::Normal);

    // Dropped silently once closed
    adapter.send_audio(&pcm16_base64(&[1, 2, 3]));
    assert!(matches!(
        adapter.connect().await,
        Err(AdapterError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut adapter = QwenAdapter::new(config(&url));
    assert!(matches!(
        adapter.connect().await,
        Err(AdapterError::Transport(_))
    ));
    assert_eq!(adapter.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_invalid_endpoint_fails_without_connecting() {
    let mut adapter = GlmAdapter::new(config("http://localhost:1"));
    assert!(matches!(
        adapter.connect().await,
        Err(AdapterError::InvalidEndpoint(_))
    ));
    assert_eq!(adapter.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_gemini_session() {
    let (url, accepted) = fake_vendor().await;
    let mut adapter = GeminiAdapter::new(config(&url).with_model("gemini-live"));
    let mut events = adapter.take_events().unwrap();

    let vendor = async {
        let mut vendor = accepted.await.unwrap();
        let setup = vendor.recv_json().await;
        vendor.send_binary_json(json!({"setupComplete": {}})).await;
        (vendor, setup)
    };
    let (connected, (mut vendor, setup)) = tokio::join!(adapter.connect(), vendor);
    connected.unwrap();
    assert_eq!(setup["setup"]["model"], "models/gemini-live");
    assert_eq!(
        setup["setup"]["generationConfig"]["responseModalities"],
        json!(["AUDIO"])
    );

    vendor
        .send_binary_json(json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "AAAA"}}]},
                "turnComplete": true
            }
        }))
        .await;
    assert!(matches!(next_event(&mut events).await, SessionEvent::Audio(a) if a == "AAAA"));
    assert!(matches!(next_event(&mut events).await, SessionEvent::TurnComplete));

    vendor
        .send_binary_json(json!({
            "toolCall": {"functionCalls": [
                {"id": "a", "name": "lookup", "args": {"q": "rust"}},
                {"id": "b", "name": "clock"}
            ]}
        }))
        .await;
    let SessionEvent::ToolCall(call) = next_event(&mut events).await else {
        panic!("expected a tool call");
    };
    assert_eq!(call.function_calls.len(), 2);
    assert_eq!(call.function_calls[0].args, json!({"q": "rust"}));
    assert_eq!(call.function_calls[1].args, json!({}));

    adapter.send_tool_response(vec![
        ToolResult {
            id: "a".into(),
            name: Some("lookup".into()),
            response: json!({"hits": 3}),
        },
        ToolResult {
            id: "b".into(),
            name: Some("clock".into()),
            response: json!({"now": "noon"}),
        },
    ]);
    let response = vendor.recv_json().await;
    let responses = response["toolResponse"]["functionResponses"].as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["name"], "lookup");

    let chunk = pcm16_base64(&[7, 8, 9]);
    adapter.send_audio(&chunk);
    let input = vendor.recv_json().await;
    assert_eq!(input["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(input["realtimeInput"]["audio"]["data"], chunk);
}

#[tokio::test]
async fn test_connect_provider_builds_requested_variant() {
    let (url, accepted) = fake_vendor().await;
    let provider: Provider = "Qwen".parse().unwrap();
    let mut adapter = connect_provider(provider, config(&url));

    let _vendor = handshake(adapter.as_mut(), accepted).await;
    assert_eq!(adapter.state(), SessionState::Ready);
    adapter.disconnect().await;
    assert_eq!(adapter.state(), SessionState::Closed);
}
