//! Voice Live WebSocket client events.
//!
//! Client events (sent to server):
//! - session.update - Configure voice, VAD, audio processing and tools
//! - input_audio_buffer.append - Append audio to the input buffer
//! - conversation.item.create - Add a function call output
//! - response.create - Generate a response
//!
//! Server events are not modelled as types here. They are forwarded as
//! loosely typed [`ServiceEvent`](crate::core::events::ServiceEvent)s and
//! classified downstream; only `response.audio.delta` is decoded by the
//! client itself.

use serde::{Deserialize, Serialize};

use super::config::{VOICE_LIVE_SAMPLE_RATE, VoiceLiveConfig};
use crate::core::realtime::base::{ModelCommand, SessionSettings, ToolDefinition};

// =============================================================================
// Session Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: VoiceConfig,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_sampling_rate: u32,
    pub turn_detection: TurnDetection,
    pub input_audio_noise_reduction: TypedSetting,
    pub input_audio_echo_cancellation: TypedSetting,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    pub tools: Vec<ToolDef>,
    pub tool_choice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub voice_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: String,
    pub threshold: f32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
}

/// A setting that is only a `{"type": ...}` selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedSetting {
    #[serde(rename = "type")]
    pub setting_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl From<&ToolDefinition> for ToolDef {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        }
    }
}

impl SessionConfig {
    pub fn build(config: &VoiceLiveConfig, settings: &SessionSettings) -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: settings.instructions.clone(),
            voice: VoiceConfig {
                name: config.voice.clone(),
                voice_type: config.voice_type.clone(),
            },
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_sampling_rate: VOICE_LIVE_SAMPLE_RATE,
            turn_detection: TurnDetection {
                detection_type: "server_vad".to_string(),
                threshold: config.vad_threshold,
                silence_duration_ms: config.silence_duration_ms,
                create_response: true,
            },
            input_audio_noise_reduction: TypedSetting {
                setting_type: config.noise_reduction.clone(),
            },
            input_audio_echo_cancellation: TypedSetting {
                setting_type: config.echo_cancellation.clone(),
            },
            input_audio_transcription: config
                .input_transcription_model
                .as_ref()
                .map(|model| InputAudioTranscription {
                    model: model.clone(),
                }),
            tools: settings.tools.iter().map(ToolDef::from).collect(),
            tool_choice: "auto".to_string(),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
}

// =============================================================================
// Client Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Box<SessionConfig> },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM
        audio: String,
    },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl From<ModelCommand> for ClientEvent {
    fn from(command: ModelCommand) -> Self {
        match command {
            ModelCommand::AppendAudio(audio) => ClientEvent::InputAudioBufferAppend { audio },
            ModelCommand::FunctionCallOutput { call_id, output } => {
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::FunctionCallOutput { call_id, output },
                }
            }
            ModelCommand::CreateResponse => ClientEvent::ResponseCreate,
        }
    }
}
