//! Realtime speech-to-speech model connections.
//!
//! - `ModelConnection` trait for the duplex session abstraction
//! - `ModelConnectionFactory` so handlers can create one connection per call
//! - Voice Live implementation
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, mono.

mod base;
pub mod voice_live;

pub use base::{
    AudioSink, BoxedModelConnection, ConnectionState, ModelCommand, ModelConnection,
    ModelConnectionFactory, ModelSender, RealtimeError, RealtimeResult, ReconnectionConfig,
    ServiceEventStream, SessionSettings, ToolDefinition,
};
pub use voice_live::{VoiceLiveConfig, VoiceLiveConnection, VoiceLiveFactory};
