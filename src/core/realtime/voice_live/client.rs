//! Voice Live realtime client.
//!
//! # API Reference
//!
//! - Endpoint: `wss://<resource>/voice-live/realtime?api-version=<v>&model=<deployment>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! The connection task owns both halves of the socket. Outgoing
//! [`ModelCommand`]s arrive on an mpsc channel; every non-audio event is
//! pushed onto the [`ServiceEventStream`] untouched.
//!
//! Audio deltas are decoded and queued for a separate pump task that feeds
//! the [`AudioSink`]. The socket loop never awaits the sink, so a stalled
//! telephony writer cannot hold up inbound audio commands. When the queue is
//! full, new chunks are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::config::VoiceLiveConfig;
use super::messages::{ClientEvent, SessionConfig};
use crate::core::credentials::{Credential, CredentialProvider};
use crate::core::events::{RESPONSE_AUDIO_DELTA, ServiceEvent};
use crate::core::realtime::base::{
    AudioSink, BoxedModelConnection, ConnectionState, ModelCommand, ModelConnection,
    ModelConnectionFactory, ModelSender, RealtimeError, RealtimeResult, ReconnectionConfig,
    ServiceEventStream, SessionSettings,
};

/// Channel capacity for outgoing client commands.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Decoded model audio waiting for the sink; roughly five seconds of speech.
const AUDIO_QUEUE_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// What the reader decided after handling one incoming frame.
enum Flow {
    Continue,
    /// The event stream consumer is gone; stop without reconnecting.
    Stop,
}

// =============================================================================
// Voice Live Client
// =============================================================================

/// Voice Live connection for one call session.
pub struct VoiceLiveConnection {
    config: VoiceLiveConfig,
    settings: SessionSettings,
    credentials: Arc<dyn CredentialProvider>,
    state: Arc<RwLock<ConnectionState>>,
    /// Shared with the connection task for lock-free readiness checks
    connected: Arc<AtomicBool>,
    /// Suppresses reconnection once disconnect has been requested
    intentional_disconnect: Arc<AtomicBool>,
    command_tx: Option<mpsc::Sender<ModelCommand>>,
    connection_handle: Option<JoinHandle<()>>,
    audio_handle: Option<JoinHandle<()>>,
}

impl VoiceLiveConnection {
    pub fn new(
        config: VoiceLiveConfig,
        settings: SessionSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            settings,
            credentials,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            command_tx: None,
            connection_handle: None,
            audio_handle: None,
        }
    }

    fn session_update(&self) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: Box::new(SessionConfig::build(&self.config, &self.settings)),
        }
    }

    /// Build the handshake request with authentication headers.
    fn build_request(url: &Url, credential: &Credential) -> RealtimeResult<http::Request<()>> {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RealtimeError::InvalidConfiguration(
                    "endpoint has no host".to_string(),
                ));
            }
        };
        let (auth_name, auth_value) = credential.header();

        http::Request::builder()
            .uri(url.as_str())
            .header(auth_name, auth_value)
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string())
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
    }

    async fn open_socket(
        url: &Url,
        credentials: &Arc<dyn CredentialProvider>,
    ) -> RealtimeResult<WsStream> {
        let credential = credentials.credential().await?;
        let request = Self::build_request(url, &credential)?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        Ok(ws_stream)
    }

    async fn send_event(sink: &mut WsSink, event: &ClientEvent) -> RealtimeResult<()> {
        let json = serde_json::to_string(event)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    /// Start the task that plays queued model audio into `sink`.
    fn spawn_audio_pump(sink: Arc<dyn AudioSink>) -> (mpsc::Sender<Bytes>, JoinHandle<()>) {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(AUDIO_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(pcm) = audio_rx.recv().await {
                if let Err(e) = sink.play(pcm).await {
                    tracing::debug!("Dropping model audio: {}", e);
                }
            }
        });
        (audio_tx, handle)
    }

    /// Route one incoming text frame.
    fn handle_text(
        text: &str,
        audio_tx: &mpsc::Sender<Bytes>,
        event_tx: &mpsc::UnboundedSender<ServiceEvent>,
    ) -> Flow {
        let event = match ServiceEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to parse Voice Live event: {}", e);
                return Flow::Continue;
            }
        };

        if event.event_type == RESPONSE_AUDIO_DELTA {
            let delta = event.view().text("delta");
            match BASE64_STANDARD.decode(delta) {
                Ok(pcm) if !pcm.is_empty() => match audio_tx.try_send(Bytes::from(pcm)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Telephony audio backed up, dropping model audio");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!("Audio pump stopped, dropping model audio");
                    }
                },
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to decode audio delta: {}", e),
            }
            return Flow::Continue;
        }

        if event_tx.send(event).is_err() {
            return Flow::Stop;
        }
        Flow::Continue
    }
}

#[async_trait]
impl ModelConnection for VoiceLiveConnection {
    async fn connect(
        &mut self,
        audio_sink: Arc<dyn AudioSink>,
    ) -> RealtimeResult<ServiceEventStream> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed(
                "connection already open".to_string(),
            ));
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let url = self.config.ws_url()?;
        let ws_stream = match Self::open_socket(&url, &self.credentials).await {
            Ok(ws) => ws,
            Err(e) => {
                *self.state.write() = ConnectionState::Failed;
                return Err(e);
            }
        };
        tracing::info!("Connected to Voice Live at {}", url.host_str().unwrap_or_default());

        let (mut ws_sink, ws_source) = ws_stream.split();

        // Configure the session before any audio can be queued
        let session_update = self.session_update();
        if let Err(e) = Self::send_event(&mut ws_sink, &session_update).await {
            *self.state.write() = ConnectionState::Failed;
            return Err(e);
        }

        let (command_tx, command_rx) = mpsc::channel::<ModelCommand>(WS_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServiceEvent>();
        let (audio_tx, audio_handle) = Self::spawn_audio_pump(audio_sink);
        self.command_tx = Some(command_tx);
        self.audio_handle = Some(audio_handle);

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        let task = ConnectionTask {
            url,
            credentials: self.credentials.clone(),
            reconnection: self.config.reconnection.clone(),
            session_update,
            state: self.state.clone(),
            connected: self.connected.clone(),
            intentional_disconnect: self.intentional_disconnect.clone(),
            audio_tx,
            event_tx,
        };
        self.connection_handle = Some(tokio::spawn(task.run(ws_sink, ws_source, command_rx)));

        Ok(event_rx)
    }

    fn sender(&self) -> RealtimeResult<ModelSender> {
        self.command_tx
            .clone()
            .map(ModelSender::new)
            .ok_or(RealtimeError::NotConnected)
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.command_tx = None;

        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.audio_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;

        tracing::info!("Disconnected from Voice Live");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }
}

impl Drop for VoiceLiveConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.audio_handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct ConnectionTask {
    url: Url,
    credentials: Arc<dyn CredentialProvider>,
    reconnection: ReconnectionConfig,
    session_update: ClientEvent,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
    audio_tx: mpsc::Sender<Bytes>,
    event_tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl ConnectionTask {
    async fn run(
        self,
        ws_sink: WsSink,
        ws_source: WsSource,
        mut command_rx: mpsc::Receiver<ModelCommand>,
    ) {
        let mut current_sink = ws_sink;
        let mut current_source = ws_source;
        let mut reconnect_attempt: u32 = 0;

        'outer: loop {
            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        let Some(command) = command else {
                            // Every sender dropped: the session is over
                            self.intentional_disconnect.store(true, Ordering::SeqCst);
                            let _ = current_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let event = ClientEvent::from(command);
                        if let Err(e) = Self::send(&mut current_sink, &event).await {
                            tracing::error!("Failed to send Voice Live event: {}", e);
                            break;
                        }
                    }

                    msg = current_source.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                reconnect_attempt = 0;
                                if let Flow::Stop = VoiceLiveConnection::handle_text(
                                    &text,
                                    &self.audio_tx,
                                    &self.event_tx,
                                ) {
                                    tracing::debug!("Event consumer gone, closing Voice Live task");
                                    self.intentional_disconnect.store(true, Ordering::SeqCst);
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = current_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!("Voice Live closed the connection: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("Voice Live WebSocket error: {}", e);
                                break;
                            }
                            None => {
                                tracing::info!("Voice Live stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            self.connected.store(false, Ordering::SeqCst);

            if self.intentional_disconnect.load(Ordering::SeqCst) {
                *self.state.write() = ConnectionState::Disconnected;
                break 'outer;
            }

            if !self.reconnection.should_retry(reconnect_attempt) {
                tracing::warn!(
                    "Voice Live connection lost after {} reconnection attempts",
                    reconnect_attempt
                );
                *self.state.write() = ConnectionState::Failed;
                break 'outer;
            }

            reconnect_attempt += 1;
            *self.state.write() = ConnectionState::Reconnecting;

            let delay = self.reconnection.delay(reconnect_attempt);
            tracing::info!(
                "Attempting Voice Live reconnection {} in {:?}",
                reconnect_attempt,
                delay
            );
            tokio::time::sleep(delay).await;

            if self.intentional_disconnect.load(Ordering::SeqCst) {
                *self.state.write() = ConnectionState::Disconnected;
                break 'outer;
            }

            match VoiceLiveConnection::open_socket(&self.url, &self.credentials).await {
                Ok(ws_stream) => {
                    let (mut sink, source) = ws_stream.split();
                    // A fresh service session knows nothing of ours
                    if let Err(e) = Self::send(&mut sink, &self.session_update).await {
                        tracing::error!("Failed to restore session after reconnection: {}", e);
                        continue;
                    }
                    current_sink = sink;
                    current_source = source;
                    self.connected.store(true, Ordering::SeqCst);
                    *self.state.write() = ConnectionState::Connected;
                    tracing::info!("Reconnected to Voice Live");
                }
                Err(e) => {
                    tracing::error!("Reconnection attempt {} failed: {}", reconnect_attempt, e);
                }
            }
        }

        // Dropping event_tx here ends the service event stream
        tracing::info!("Voice Live connection task ended");
    }

    async fn send(sink: &mut WsSink, event: &ClientEvent) -> RealtimeResult<()> {
        VoiceLiveConnection::send_event(sink, event).await
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates a [`VoiceLiveConnection`] per session from shared settings.
pub struct VoiceLiveFactory {
    config: VoiceLiveConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl VoiceLiveFactory {
    pub fn new(config: VoiceLiveConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            credentials,
        }
    }
}

impl ModelConnectionFactory for VoiceLiveFactory {
    fn create(&self, settings: SessionSettings) -> RealtimeResult<BoxedModelConnection> {
        // Fail fast on a bad endpoint instead of at connect time
        self.config.ws_url()?;
        Ok(Box::new(VoiceLiveConnection::new(
            self.config.clone(),
            settings,
            self.credentials.clone(),
        )))
    }
}
