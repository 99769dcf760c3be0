//! Per-call conversation state and the process-wide session registry.
//!
//! A [`ConversationSession`] is created when a telephony connection is
//! accepted and dropped when it closes. It is owned by the model event loop,
//! which is the only code path that mutates the transcript or the watermark.
//!
//! The [`SessionRegistry`] is created once at startup and shared through the
//! application state. It only tracks metadata about live calls so operators
//! can list them; it never holds transcript data.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::transcript::{Transcript, TranscriptEntry};

// =============================================================================
// Conversation Session
// =============================================================================

/// Identity of the telephony call backing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    pub call_connection_id: String,
}

/// Conversation state for one active call.
#[derive(Debug)]
pub struct ConversationSession {
    pub session_id: String,
    pub transcript: Transcript,
    /// Index of the first transcript entry not yet published.
    pub unsent_watermark: usize,
    pub call_context: Option<CallIdentity>,
    pub is_development_mode: bool,
}

impl ConversationSession {
    /// Create a session whose transcript starts with the system prompt.
    ///
    /// The watermark starts past the system prompt so it is never published.
    pub fn new(
        session_id: impl Into<String>,
        instructions: &str,
        call_context: Option<CallIdentity>,
    ) -> Self {
        let mut transcript = Transcript::new();
        transcript.add_system_message(instructions);
        let unsent_watermark = transcript.len();
        Self {
            session_id: session_id.into(),
            transcript,
            unsent_watermark,
            is_development_mode: call_context.is_none(),
            call_context,
        }
    }

    /// Entries appended since the last publish.
    pub fn pending(&self) -> &[TranscriptEntry] {
        self.transcript.since(self.unsent_watermark)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending().is_empty()
    }

    /// Move the watermark forward. Never moves it backwards.
    pub fn advance_watermark(&mut self, to: usize) {
        self.unsent_watermark = self.unsent_watermark.max(to.min(self.transcript.len()));
    }

    pub fn call_connection_id(&self) -> Option<&str> {
        self.call_context
            .as_ref()
            .map(|c| c.call_connection_id.as_str())
    }
}

// =============================================================================
// Session Registry
// =============================================================================

/// Metadata about a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_connection_id: Option<String>,
    pub development_mode: bool,
    pub started_at: String,
}

/// Registry of live call sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionInfo>,
    counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return a guard that unregisters it on drop.
    pub fn register(self: &Arc<Self>, call_connection_id: Option<String>) -> SessionGuard {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let session_id = format!("call_{n}");
        let started_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        let info = SessionInfo {
            session_id: session_id.clone(),
            development_mode: call_connection_id.is_none(),
            call_connection_id,
            started_at,
        };
        self.sessions.insert(session_id.clone(), info);
        tracing::info!(session_id = %session_id, "Registered call session");

        SessionGuard {
            registry: Arc::clone(self),
            session_id,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// Snapshot of live sessions ordered by start.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.clone()).collect();
        sessions.sort_by_key(|info| session_number(&info.session_id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn unregister(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            tracing::info!(session_id = %session_id, "Unregistered call session");
        }
    }
}

fn session_number(session_id: &str) -> u64 {
    session_id
        .rsplit('_')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Keeps a session registered for as long as it is alive.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.session_id);
    }
}
