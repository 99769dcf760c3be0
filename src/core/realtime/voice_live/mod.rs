//! Azure Voice Live model connection.

mod client;
mod config;
mod messages;

pub use client::{VoiceLiveConnection, VoiceLiveFactory};
pub use config::{
    DEFAULT_API_VERSION, DEFAULT_DEPLOYMENT, DEFAULT_VOICE, DEFAULT_VOICE_TYPE,
    VOICE_LIVE_SAMPLE_RATE, VoiceLiveConfig,
};
pub use messages::{ClientEvent, SessionConfig, ToolDef};
