//! Delta publisher.
//!
//! Pushes transcript deltas and caption frames to the telephony-side client.
//! Delivery is at-most-once: a failed write is logged and the watermark still
//! advances, so an entry is never sent twice.

use crate::core::frames::{AGENT_ERROR_MESSAGE, Caption, ClientChannel, ClientFrame, Speaker};
use crate::core::session::ConversationSession;

#[derive(Debug, Clone)]
pub struct DeltaPublisher {
    channel: ClientChannel,
}

impl DeltaPublisher {
    pub fn new(channel: ClientChannel) -> Self {
        Self { channel }
    }

    /// Publish entries past the watermark as one `ChatHistory` frame.
    ///
    /// Returns the new watermark, which always equals the transcript length.
    /// Nothing is sent when there is nothing pending.
    pub async fn publish(&self, session: &mut ConversationSession) -> usize {
        let pending = session.pending();
        if !pending.is_empty() {
            let count = pending.len();
            let frame = ClientFrame::ChatHistory { data: pending };
            match self.channel.send_frame(&frame).await {
                Ok(()) => tracing::debug!(
                    session_id = %session.session_id,
                    "Published {} transcript entries",
                    count
                ),
                Err(e) => tracing::warn!(
                    session_id = %session.session_id,
                    "Failed to publish transcript delta: {}",
                    e
                ),
            }
        }

        let watermark = session.transcript.len();
        session.advance_watermark(watermark);
        session.unsent_watermark
    }

    /// Send a live caption.
    pub async fn caption(&self, speaker: Speaker, text: &str, timestamp: Option<i64>) {
        let frame = ClientFrame::Transcription {
            data: Caption {
                speaker,
                text,
                timestamp,
            },
        };
        if let Err(e) = self.channel.send_frame(&frame).await {
            tracing::warn!("Failed to send caption: {}", e);
        }
    }

    /// Best-effort notice that the session loop stopped on an error.
    pub async fn agent_error(&self, details: &str) {
        let frame = ClientFrame::AgentError {
            message: AGENT_ERROR_MESSAGE,
            details,
        };
        if let Err(e) = self.channel.send_frame(&frame).await {
            tracing::debug!("Could not deliver AgentError: {}", e);
        }
    }

    pub fn channel(&self) -> &ClientChannel {
        &self.channel
    }
}
