//! Call Session Flow Tests
//!
//! End-to-end tests running the bridge in-process against a mock Voice Live
//! server, with a telephony client on the media WebSocket.

mod mock_voice_live;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use mock_voice_live::*;
use voice_call_bridge::plugin::{StandardToolPlugins, ToolPlugin};

fn standard_plugins() -> Arc<StandardToolPlugins> {
    Arc::new(StandardToolPlugins::new(Vec::new()))
}

#[tokio::test]
async fn test_session_update_carries_instructions_and_tools() {
    let mut model = MockVoiceLive::start().await;
    let state = test_state(test_config(&model.endpoint), standard_plugins());
    let addr = spawn_bridge(state).await;

    let _client = connect_telephony(addr, None).await;
    let update = model.expect_event("session.update").await;

    assert_eq!(update["session"]["instructions"], "You are Sam, a test agent.");
    let tools: Vec<&str> = update["session"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(tools.contains(&"delivery-schedule_delivery"));
    assert!(tools.contains(&"call-hangup"));
    assert_eq!(update["session"]["tool_choice"], "auto");
}

#[tokio::test]
async fn test_inbound_audio_forwarded_unmodified() {
    let mut model = MockVoiceLive::start().await;
    let state = test_state(test_config(&model.endpoint), standard_plugins());
    let addr = spawn_bridge(state).await;

    let mut client = connect_telephony(addr, None).await;
    model.expect_event("session.update").await;

    client.send(audio_data_frame("AAECAwQF")).await.unwrap();
    client
        .send(Message::Text(r#"{"kind":"AudioMetadata","audioMetadata":{}}"#.into()))
        .await
        .unwrap();
    client.send(audio_data_frame("BgcICQ==")).await.unwrap();

    let first = model.expect_event("input_audio_buffer.append").await;
    let second = model.expect_event("input_audio_buffer.append").await;
    assert_eq!(first["audio"], "AAECAwQF");
    assert_eq!(second["audio"], "BgcICQ==");
}

#[tokio::test]
async fn test_model_audio_and_barge_in() {
    let mut model = MockVoiceLive::start().await;
    let state = test_state(test_config(&model.endpoint), standard_plugins());
    let addr = spawn_bridge(state).await;

    let mut client = connect_telephony(addr, None).await;
    model.expect_event("session.update").await;

    model.emit(json!({"type": "response.audio.delta", "delta": "AAECAw=="}));
    let audio = expect_kind(&mut client, "AudioData").await;
    assert_eq!(audio["audioData"]["data"], "AAECAw==");

    model.emit(json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 1200}));
    let stop = expect_kind(&mut client, "StopAudio").await;
    assert_eq!(stop, json!({"Kind": "StopAudio", "AudioData": null, "StopAudio": {}}));
}

#[tokio::test]
async fn test_user_turn_published_once() {
    let mut model = MockVoiceLive::start().await;
    let state = test_state(test_config(&model.endpoint), standard_plugins());
    let addr = spawn_bridge(state).await;

    let mut client = connect_telephony(addr, None).await;
    model.expect_event("session.update").await;

    model.emit(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": "I need apples",
        "audio_start_ms": 340
    }));
    let caption = expect_kind(&mut client, "Transcription").await;
    assert_eq!(caption["data"]["speaker"], "user");
    assert_eq!(caption["data"]["text"], "I need apples");

    let history = expect_kind(&mut client, "ChatHistory").await;
    assert_eq!(history["data"], json!([{"role": "user", "content": "I need apples"}]));

    // Nothing left to publish; the response boundary sends no empty delta.
    model.emit(json!({"type": "response.done", "response": {"id": "resp_1"}}));
    model.emit(json!({"type": "response.audio_transcript.done", "transcript": "Sure."}));
    let caption = expect_kind(&mut client, "Transcription").await;
    assert_eq!(caption["data"]["speaker"], "assistant");
    assert!(caption["data"]["timestamp"].is_null());
    let history = expect_kind(&mut client, "ChatHistory").await;
    assert_eq!(history["data"], json!([{"role": "assistant", "content": "Sure."}]));
}

#[tokio::test]
async fn test_live_session_suppresses_user_caption() {
    let mut model = MockVoiceLive::start().await;
    let state = test_state(test_config(&model.endpoint), standard_plugins());
    let addr = spawn_bridge(state).await;

    let mut client = connect_telephony(addr, Some("call-connection-1")).await;
    model.expect_event("session.update").await;

    model.emit(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": "Where is my order?"
    }));
    let first = next_frame(&mut client).await.unwrap();
    assert_eq!(first["kind"], "ChatHistory");
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let mut model = MockVoiceLive::start().await;
    let state = test_state(test_config(&model.endpoint), standard_plugins());
    let addr = spawn_bridge(state).await;

    let mut client = connect_telephony(addr, None).await;
    model.expect_event("session.update").await;

    model.emit(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "call_1",
        "name": "delivery-schedule_delivery",
        "arguments": "{\"slot_id\":\"3\"}"
    }));

    // Identity not verified yet: the precondition error goes back to the model.
    let output = model.expect_event("conversation.item.create").await;
    assert_eq!(output["item"]["type"], "function_call_output");
    assert_eq!(output["item"]["call_id"], "call_1");
    assert!(
        output["item"]["output"]
            .as_str()
            .unwrap()
            .contains("Precondition failed")
    );
    model.expect_event("response.create").await;

    let history = expect_kind(&mut client, "ChatHistory").await;
    let entry = &history["data"][0];
    assert_eq!(entry["role"], "tool");
    assert_eq!(entry["function_calls"][0]["function_name"], "schedule_delivery");
    assert_eq!(entry["function_calls"][0]["plugin"], "delivery");
}

#[tokio::test]
async fn test_model_error_apologizes_and_continues() {
    let mut model = MockVoiceLive::start().await;
    let state = test_state(test_config(&model.endpoint), standard_plugins());
    let addr = spawn_bridge(state).await;

    let mut client = connect_telephony(addr, None).await;
    model.expect_event("session.update").await;

    model.emit(json!({"type": "error", "error": {"code": "rate_limited"}}));
    let history = expect_kind(&mut client, "ChatHistory").await;
    assert_eq!(history["data"][0]["role"], "assistant");

    model.emit(json!({"type": "input_audio_buffer.speech_started"}));
    expect_kind(&mut client, "StopAudio").await;
}

#[tokio::test]
async fn test_mandatory_plugin_failure_closes_with_error() {
    let model = MockVoiceLive::start().await;
    let plugins = Arc::new(FixedPlugins {
        extra: vec![Arc::new(UnreachablePlugin { mandatory: true })],
    });
    let state = test_state(test_config(&model.endpoint), plugins);
    let addr = spawn_bridge(Arc::clone(&state)).await;

    let mut client = connect_telephony(addr, None).await;
    let error = expect_kind(&mut client, "Error").await;
    assert_eq!(error["code"], "MCPPluginConnectionError");
    assert_eq!(expect_close(&mut client).await, Some(1011));

    // The model was never contacted and the session is gone.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(model.connections.load(Ordering::SeqCst), 0);
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn test_optional_plugin_failure_is_skipped() {
    let mut model = MockVoiceLive::start().await;
    let plugins = Arc::new(FixedPlugins {
        extra: vec![Arc::new(UnreachablePlugin { mandatory: false })],
    });
    let state = test_state(test_config(&model.endpoint), plugins);
    let addr = spawn_bridge(state).await;

    let _client = connect_telephony(addr, None).await;
    let update = model.expect_event("session.update").await;
    let tools = update["session"]["tools"].as_array().unwrap();
    assert!(tools.iter().all(|t| !t["name"].as_str().unwrap().starts_with("orders-")));
}

#[tokio::test]
async fn test_socket_close_tears_down_everything() {
    let mut model = MockVoiceLive::start().await;
    let counting = Arc::new(CountingPlugin::default());
    let plugins = Arc::new(FixedPlugins {
        extra: vec![Arc::clone(&counting) as Arc<dyn ToolPlugin>],
    });
    let state = test_state(test_config(&model.endpoint), plugins);
    let addr = spawn_bridge(Arc::clone(&state)).await;

    let mut client = connect_telephony(addr, Some("call-connection-7")).await;
    model.expect_event("session.update").await;
    assert_eq!(state.sessions.len(), 1);
    assert_eq!(
        state.sessions.list()[0].call_connection_id.as_deref(),
        Some("call-connection-7")
    );

    client.close(None).await.unwrap();

    assert!(model.wait_closed().await);
    for _ in 0..100 {
        if state.sessions.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(state.sessions.is_empty());
    assert_eq!(counting.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(state.ws_connection_count(), 0);
}
