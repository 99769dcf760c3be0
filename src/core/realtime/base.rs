//! Base traits and types for the realtime model connection.
//!
//! A model connection is a duplex WebSocket session with a speech-to-speech
//! model. Audio output is pushed straight into an injected [`AudioSink`];
//! every other server event is forwarded on a [`ServiceEventStream`] for the
//! turn reconciler. Client commands go through a cloneable [`ModelSender`] so
//! the inbound audio path and the tool bridge can write concurrently.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, 24kHz, mono.

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::events::ServiceEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the model endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Credential acquisition or authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The audio sink rejected a chunk because its socket is gone
    #[error("Audio sink closed")]
    SinkClosed,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

const DEFAULT_INITIAL_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 8000;

fn default_jitter() -> bool {
    true
}

/// Backoff policy for re-opening a dropped model connection.
///
/// `max_attempts == 0` disables reconnection. A caller on hold will not wait
/// long, so delays double from `initial_delay_ms` and stop at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Spread each delay by up to a quarter either way
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ReconnectionConfig {
    pub fn disabled() -> Self {
        Self::with_attempts(0)
    }

    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: default_jitter(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Whether attempt number `attempts_made + 1` may run.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Wait before the 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(32);
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << doublings)
            .min(self.max_delay_ms);

        let ms = if self.jitter && base > 0 {
            let spread = base / 4;
            rand::thread_rng().gen_range(base - spread..=base + spread)
        } else {
            base
        };
        Duration::from_millis(ms)
    }
}

/// A function the model may call, as advertised in the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Wire name, `{plugin}-{function}`
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object
    pub parameters: serde_json::Value,
}

/// Per-session settings handed to the model connection factory.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    /// Rendered system prompt
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for the model connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Reconnecting after connection loss
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Commands and Streams
// =============================================================================

/// Provider-neutral command sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelCommand {
    /// Append base64-encoded PCM to the input audio buffer
    AppendAudio(String),
    /// Write a tool result back into the conversation
    FunctionCallOutput { call_id: String, output: String },
    /// Ask the model to continue the turn
    CreateResponse,
}

/// Cloneable handle for writing commands to the model connection.
#[derive(Debug, Clone)]
pub struct ModelSender {
    tx: mpsc::Sender<ModelCommand>,
}

impl ModelSender {
    pub fn new(tx: mpsc::Sender<ModelCommand>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, command: ModelCommand) -> RealtimeResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Forward inbound audio exactly as received.
    pub async fn append_audio(&self, base64_pcm: String) -> RealtimeResult<()> {
        self.send(ModelCommand::AppendAudio(base64_pcm)).await
    }

    /// Return a tool result to the model and request a continuation.
    pub async fn submit_function_result(
        &self,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> RealtimeResult<()> {
        self.send(ModelCommand::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        })
        .await?;
        self.send(ModelCommand::CreateResponse).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Ordered stream of non-audio server events.
///
/// Unbounded so the reader task never waits on the reconciler; audio, the
/// high-volume path, does not travel on this stream.
pub type ServiceEventStream = mpsc::UnboundedReceiver<ServiceEvent>;

// =============================================================================
// Audio Sink
// =============================================================================

/// Destination for model audio output.
///
/// Invoked from a dedicated audio task once per decoded audio chunk, in
/// arrival order. A slow sink delays only model audio, never inbound
/// commands or transcript processing.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, pcm: Bytes) -> RealtimeResult<()>;
}

// =============================================================================
// Model Connection Trait
// =============================================================================

/// A duplex session with a realtime speech-to-speech model.
#[async_trait]
pub trait ModelConnection: Send + Sync {
    /// Open the connection, configure the session, and start the reader task.
    ///
    /// Audio output is delivered to `audio_sink`; every other event is
    /// returned on the stream, which ends when the connection is gone.
    async fn connect(&mut self, audio_sink: Arc<dyn AudioSink>)
    -> RealtimeResult<ServiceEventStream>;

    /// A sender for client commands. Fails when not connected.
    fn sender(&self) -> RealtimeResult<ModelSender>;

    /// Close the connection and stop the reader task.
    async fn disconnect(&mut self) -> RealtimeResult<()>;

    fn is_ready(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;
}

/// Boxed trait object for model connections.
pub type BoxedModelConnection = Box<dyn ModelConnection>;

/// Creates one model connection per call session.
pub trait ModelConnectionFactory: Send + Sync {
    fn create(&self, settings: SessionSettings) -> RealtimeResult<BoxedModelConnection>;
}
