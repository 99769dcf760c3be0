//! Mock Voice Live server and test harness helpers
//!
//! The mock accepts realtime WebSocket connections, records every client
//! event and plays back server events pushed by the test. The helpers spin
//! up the bridge in-process and connect a telephony client to it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, tungstenite::Message};

use voice_call_bridge::plugin::{
    CapabilityRef, PluginError, StandardToolPlugins, ToolPlugin, ToolPluginProvider,
};
use voice_call_bridge::{
    AppState, ServerConfig, StaticCredentialProvider, VoiceLiveFactory, routes,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub type TelephonyClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Mock Voice Live
// =============================================================================

pub struct MockVoiceLive {
    /// HTTP endpoint the bridge is configured with
    pub endpoint: String,
    /// Every event the bridge sent, parsed
    pub client_events: mpsc::UnboundedReceiver<Value>,
    server_events: mpsc::UnboundedSender<Value>,
    pub connections: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl MockVoiceLive {
    /// Start a mock that serves a single realtime connection.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client_tx, client_events) = mpsc::unbounded_channel();
        let (server_events, mut server_rx) = mpsc::unbounded_channel::<Value>();
        let connections = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let connections_task = Arc::clone(&connections);
        let closed_task = Arc::clone(&closed);
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(stream).await else {
                return;
            };
            connections_task.fetch_add(1, Ordering::SeqCst);
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                let _ = client_tx.send(value);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    },
                    Some(event) = server_rx.recv() => {
                        if write.send(Message::Text(event.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            closed_task.store(true, Ordering::SeqCst);
        });

        Self {
            endpoint: format!("http://{addr}"),
            client_events,
            server_events,
            connections,
            closed,
        }
    }

    /// Push a server event to the bridge.
    pub fn emit(&self, event: Value) {
        self.server_events.send(event).unwrap();
    }

    /// Wait for the next client event of `event_type`, skipping others.
    pub async fn expect_event(&mut self, event_type: &str) -> Value {
        tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                let event = self.client_events.recv().await.expect("mock closed");
                if event["type"] == event_type {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {event_type}"))
    }

    pub async fn wait_closed(&self) -> bool {
        for _ in 0..100 {
            if self.closed.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

// =============================================================================
// Test plugins
// =============================================================================

/// Plugin that never connects.
pub struct UnreachablePlugin {
    pub mandatory: bool,
}

#[async_trait]
impl ToolPlugin for UnreachablePlugin {
    fn namespace(&self) -> &str {
        "orders"
    }

    fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    async fn connect(&self) -> Result<Vec<CapabilityRef>, PluginError> {
        Err(PluginError::ConnectionFailed {
            plugin: "orders".to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

/// Plugin with no tools that counts disconnects and fails them.
#[derive(Default)]
pub struct CountingPlugin {
    pub disconnects: AtomicUsize,
}

#[async_trait]
impl ToolPlugin for CountingPlugin {
    fn namespace(&self) -> &str {
        "audit"
    }

    async fn connect(&self) -> Result<Vec<CapabilityRef>, PluginError> {
        Ok(Vec::new())
    }

    async fn disconnect(&self) -> Result<(), PluginError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Err(PluginError::Protocol("already gone".to_string()))
    }
}

/// Provider that hands out fixed plugin instances, then the built-ins.
pub struct FixedPlugins {
    pub extra: Vec<Arc<dyn ToolPlugin>>,
}

impl ToolPluginProvider for FixedPlugins {
    fn plugins_for_session(&self) -> Vec<Arc<dyn ToolPlugin>> {
        let mut plugins = StandardToolPlugins::new(Vec::new()).plugins_for_session();
        plugins.extend(self.extra.iter().cloned());
        plugins
    }
}

// =============================================================================
// Bridge harness
// =============================================================================

pub fn test_config(endpoint: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.ai_services_endpoint = endpoint.to_string();
    config.ai_services_api_key = Some("test-key".to_string());
    config.tool_connect_timeout_ms = 500;
    config
}

pub fn test_state(config: ServerConfig, plugins: Arc<dyn ToolPluginProvider>) -> Arc<AppState> {
    let credentials = StaticCredentialProvider::from_parts(Some("test-key"), None).unwrap();
    let factory = Arc::new(VoiceLiveFactory::new(
        config.voice_live_config(),
        Arc::new(credentials),
    ));
    AppState::with_components(
        config,
        factory,
        plugins,
        None,
        "You are Sam, a test agent.".to_string(),
    )
}

/// Serve the bridge on an ephemeral port.
pub async fn spawn_bridge(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Connect a telephony client, optionally as a live call.
pub async fn connect_telephony(addr: SocketAddr, call_connection_id: Option<&str>) -> TelephonyClient {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(id) = call_connection_id {
        request
            .headers_mut()
            .insert("x-ms-call-connection-id", HeaderValue::from_str(id).unwrap());
    }
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

/// Next JSON text frame, or `None` once the bridge closes the socket.
pub async fn next_frame(client: &mut TelephonyClient) -> Option<Value> {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(&text).unwrap());
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("timed out waiting for a telephony frame")
}

/// Next frame with the given `kind`, skipping audio and other frames.
pub async fn expect_kind(client: &mut TelephonyClient, kind: &str) -> Value {
    loop {
        let frame = next_frame(client)
            .await
            .unwrap_or_else(|| panic!("socket closed while waiting for {kind}"));
        if frame["kind"] == kind || frame["Kind"] == kind {
            return frame;
        }
    }
}

/// Close code of the socket, skipping any frames before the close.
pub async fn expect_close(client: &mut TelephonyClient) -> Option<u16> {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                None | Some(Err(_)) => return None,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}

pub fn audio_data_frame(base64_pcm: &str) -> Message {
    let frame = serde_json::json!({"kind": "AudioData", "audioData": {"data": base64_pcm}});
    Message::Text(frame.to_string().into())
}
