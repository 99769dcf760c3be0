//! Service event classification.
//!
//! The realtime model emits a single stream of loosely typed JSON events.
//! [`classify`] maps each one to an [`EventCategory`] so the reconciler can
//! handle events table-style, and [`EventView`] gives miss-tolerant access to
//! nested payload fields.
//!
//! Payload shapes evolve upstream, so nothing here fails: an absent or null
//! field anywhere along a dotted path yields `None`, or the [`UNKNOWN`]
//! sentinel when a display string is wanted.

use serde_json::Value;
use std::fmt;

/// Sentinel used when a telemetry field is missing.
pub const UNKNOWN: &str = "<unknown>";

// =============================================================================
// Event Types
// =============================================================================

pub const SESSION_CREATED: &str = "session.created";
pub const ERROR: &str = "error";
pub const INPUT_AUDIO_BUFFER_CLEARED: &str = "input_audio_buffer.cleared";
pub const INPUT_AUDIO_BUFFER_SPEECH_STARTED: &str = "input_audio_buffer.speech_started";
pub const INPUT_AUDIO_TRANSCRIPTION_COMPLETED: &str =
    "conversation.item.input_audio_transcription.completed";
pub const INPUT_AUDIO_TRANSCRIPTION_FAILED: &str =
    "conversation.item.input_audio_transcription.failed";
pub const RESPONSE_DONE: &str = "response.done";
pub const RESPONSE_AUDIO_DELTA: &str = "response.audio.delta";
pub const RESPONSE_AUDIO_TRANSCRIPT_DONE: &str = "response.audio_transcript.done";
pub const RESPONSE_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
/// Emitted locally once a tool result has been written back to the model.
pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";

/// A single event received from the model connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEvent {
    pub event_type: String,
    pub payload: Value,
}

impl ServiceEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Parse a raw text frame. The event type is read from the `type` field.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_str(text)?;
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            event_type,
            payload,
        })
    }

    pub fn view(&self) -> EventView<'_> {
        EventView::new(&self.payload)
    }

    pub fn category(&self) -> EventCategory {
        classify(self)
    }
}

// =============================================================================
// Categories
// =============================================================================

/// Semantic category of a service event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    SessionCreated,
    Error,
    AudioBufferCleared,
    SpeechStarted,
    UserTranscriptionDone,
    UserTranscriptionFailed,
    ResponseDone,
    AssistantTranscriptDone,
    ToolCallCreate,
    /// A `function_call` output item was announced; carries the function name.
    ToolCallItemAdded,
    /// The model finished streaming arguments for a function call.
    ToolCallRequested,
    Unhandled,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::SessionCreated => "SessionCreated",
            EventCategory::Error => "Error",
            EventCategory::AudioBufferCleared => "AudioBufferCleared",
            EventCategory::SpeechStarted => "SpeechStarted",
            EventCategory::UserTranscriptionDone => "UserTranscriptionDone",
            EventCategory::UserTranscriptionFailed => "UserTranscriptionFailed",
            EventCategory::ResponseDone => "ResponseDone",
            EventCategory::AssistantTranscriptDone => "AssistantTranscriptDone",
            EventCategory::ToolCallCreate => "ToolCallCreate",
            EventCategory::ToolCallItemAdded => "ToolCallItemAdded",
            EventCategory::ToolCallRequested => "ToolCallRequested",
            EventCategory::Unhandled => "Unhandled",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a service event to its category.
pub fn classify(event: &ServiceEvent) -> EventCategory {
    match event.event_type.as_str() {
        SESSION_CREATED => EventCategory::SessionCreated,
        ERROR => EventCategory::Error,
        INPUT_AUDIO_BUFFER_CLEARED => EventCategory::AudioBufferCleared,
        INPUT_AUDIO_BUFFER_SPEECH_STARTED => EventCategory::SpeechStarted,
        INPUT_AUDIO_TRANSCRIPTION_COMPLETED => EventCategory::UserTranscriptionDone,
        INPUT_AUDIO_TRANSCRIPTION_FAILED => EventCategory::UserTranscriptionFailed,
        RESPONSE_DONE => EventCategory::ResponseDone,
        RESPONSE_AUDIO_TRANSCRIPT_DONE => EventCategory::AssistantTranscriptDone,
        CONVERSATION_ITEM_CREATE => EventCategory::ToolCallCreate,
        RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE => EventCategory::ToolCallRequested,
        RESPONSE_OUTPUT_ITEM_ADDED if event.view().str("item.type") == Some("function_call") => {
            EventCategory::ToolCallItemAdded
        }
        _ => EventCategory::Unhandled,
    }
}

// =============================================================================
// Miss-safe payload access
// =============================================================================

/// Follow a dotted path through nested objects.
///
/// Numeric segments index into arrays. Returns `None` when any segment is
/// missing, when an intermediate value has the wrong shape, or when the final
/// value is `null`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    if !path.is_empty() {
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
    }
    (!current.is_null()).then_some(current)
}

/// Read-only, miss-tolerant view over an event payload.
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    payload: &'a Value,
}

impl<'a> EventView<'a> {
    pub fn new(payload: &'a Value) -> Self {
        Self { payload }
    }

    pub fn get(&self, path: &str) -> Option<&'a Value> {
        lookup(self.payload, path)
    }

    pub fn str(&self, path: &str) -> Option<&'a str> {
        self.get(path).and_then(Value::as_str)
    }

    /// String field, or the empty string when missing.
    pub fn text(&self, path: &str) -> &'a str {
        self.str(path).unwrap_or_default()
    }

    pub fn i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// Human-readable rendering for logs: strings as-is, other values as
    /// compact JSON, missing or empty values as [`UNKNOWN`].
    pub fn display(&self, path: &str) -> String {
        match self.get(path) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) | None => UNKNOWN.to_string(),
            Some(other) => other.to_string(),
        }
    }
}
