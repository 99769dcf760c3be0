//! Conversation transcript store.
//!
//! An ordered, append-only log of the conversation held by a single call
//! session. Entries carry a role, optional text content and any structured
//! function-call records attached to the turn.
//!
//! Every entry receives a `sequence_index` at append time. Indices are
//! strictly increasing and never reused, so a client can detect gaps when
//! stitching published deltas back together.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

// =============================================================================
// Roles
// =============================================================================

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

// =============================================================================
// Function Call Records
// =============================================================================

/// Structured record of a tool call attached to a transcript entry.
///
/// The wire shape uses `plugin` for the plugin namespace, matching what the
/// frontend renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FunctionCallRecord {
    /// The model asked for a function to be called.
    Invocation {
        function_name: String,
        #[serde(rename = "plugin")]
        plugin_name: String,
        arguments: Value,
    },
    /// A function finished and produced a result.
    Result {
        function_name: String,
        #[serde(rename = "plugin")]
        plugin_name: String,
        arguments_sent: Value,
        arguments_used: Value,
        result: Value,
    },
}

impl FunctionCallRecord {
    pub fn function_name(&self) -> &str {
        match self {
            FunctionCallRecord::Invocation { function_name, .. }
            | FunctionCallRecord::Result { function_name, .. } => function_name,
        }
    }

    pub fn plugin_name(&self) -> &str {
        match self {
            FunctionCallRecord::Invocation { plugin_name, .. }
            | FunctionCallRecord::Result { plugin_name, .. } => plugin_name,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, FunctionCallRecord::Result { .. })
    }
}

/// Parse model-supplied function arguments.
///
/// Returns the parsed JSON when the text is valid JSON, otherwise the raw
/// text as a JSON string. Empty input maps to an empty object.
pub fn parse_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
}

// =============================================================================
// Entries
// =============================================================================

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    #[serde(
        skip_serializing_if = "content_is_blank",
        serialize_with = "serialize_content"
    )]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCallRecord>,
    #[serde(skip)]
    pub sequence_index: u64,
}

fn content_is_blank(content: &Option<String>) -> bool {
    content.as_deref().is_none_or(str::is_empty)
}

fn serialize_content<S: Serializer>(content: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(content.as_deref().unwrap_or_default())
}

// =============================================================================
// Store
// =============================================================================

/// Append-only transcript for one conversation.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    next_sequence: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return the sequence index it was given.
    pub fn append(
        &mut self,
        role: Role,
        content: Option<String>,
        function_calls: Vec<FunctionCallRecord>,
    ) -> u64 {
        let sequence_index = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(TranscriptEntry {
            role,
            content,
            function_calls,
            sequence_index,
        });
        sequence_index
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) -> u64 {
        self.append(Role::System, Some(content.into()), Vec::new())
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) -> u64 {
        self.append(Role::User, Some(content.into()), Vec::new())
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) -> u64 {
        self.append(Role::Assistant, Some(content.into()), Vec::new())
    }

    /// Record that the model requested a function call.
    pub fn add_function_invocation(&mut self, record: FunctionCallRecord) -> u64 {
        self.append(Role::Assistant, None, vec![record])
    }

    /// Record a completed function call as a tool message.
    pub fn add_tool_result(&mut self, record: FunctionCallRecord) -> u64 {
        self.append(Role::Tool, None, vec![record])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Entries at or after `from`. An index past the end yields an empty slice.
    pub fn since(&self, from: usize) -> &[TranscriptEntry] {
        &self.entries[from.min(self.entries.len())..]
    }
}
