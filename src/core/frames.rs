//! Telephony-side wire protocol.
//!
//! The media-streaming socket carries JSON text frames in both directions.
//! Inbound frames are parsed into [`InboundFrame`]; outbound frames are
//! serialized into text up front and queued on a [`ClientChannel`], which
//! feeds the task that owns the socket write half.
//!
//! The barge-in frame spells its keys `Kind`, `AudioData` and `StopAudio`
//! with capital letters. Clients match on that exact shape.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::transcript::TranscriptEntry;

/// Close code sent when session setup fails on our side.
pub const CLOSE_CODE_INTERNAL_ERROR: u16 = 1011;

/// Message shown to the client when the event loop terminates on an error.
pub const AGENT_ERROR_MESSAGE: &str = "A tool call failed. The assistant will continue.";

// =============================================================================
// Inbound
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AudioPayload {
    /// Base64-encoded PCM audio
    pub data: String,
}

/// A frame received from the telephony side.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind")]
pub enum InboundFrame {
    AudioData {
        #[serde(rename = "audioData")]
        audio_data: AudioPayload,
    },
    /// Metadata and any other frame kinds the bridge does not act on.
    #[serde(other)]
    Other,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Who spoke a captioned utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct Caption<'a> {
    pub speaker: Speaker,
    pub text: &'a str,
    pub timestamp: Option<i64>,
}

/// Frames sent to the telephony side, other than audio and barge-in.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum ClientFrame<'a> {
    ChatHistory {
        data: &'a [TranscriptEntry],
    },
    Transcription {
        data: Caption<'a>,
    },
    AgentError {
        message: &'a str,
        details: &'a str,
    },
    Error {
        code: &'a str,
        message: &'a str,
    },
}

impl ClientFrame<'_> {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Wrap raw PCM in the `AudioData` envelope.
///
/// Built by hand because it runs for every audio chunk and base64 output
/// never needs JSON escaping.
pub fn audio_frame(pcm: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(pcm);
    let mut frame = String::with_capacity(encoded.len() + 44);
    frame.push_str(r#"{"kind":"AudioData","audioData":{"data":""#);
    frame.push_str(&encoded);
    frame.push_str(r#""}}"#);
    frame
}

/// Barge-in control frame.
pub fn stop_audio_frame() -> String {
    r#"{"Kind":"StopAudio","AudioData":null,"StopAudio":{}}"#.to_string()
}

// =============================================================================
// Client Channel
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("telephony socket writer has shut down")]
    Closed,
}

/// Messages consumed by the socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

/// Cloneable handle for queueing frames to the telephony socket.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ClientChannel {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Create a channel together with the receiving end for the writer task.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        self.tx
            .send(OutboundMessage::Text(text))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    pub async fn send_frame(&self, frame: &ClientFrame<'_>) -> Result<(), ChannelError> {
        match frame.to_text() {
            Ok(text) => self.send_text(text).await,
            Err(e) => {
                tracing::error!("Failed to serialize client frame: {}", e);
                Ok(())
            }
        }
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), ChannelError> {
        self.tx
            .send(OutboundMessage::Close {
                code,
                reason: reason.into(),
            })
            .await
            .map_err(|_| ChannelError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transcript::Transcript;
    use serde_json::{Value, json};

    #[test]
    fn test_parse_inbound_audio() {
        let frame =
            InboundFrame::parse(r#"{"kind":"AudioData","audioData":{"data":"AAEC"}}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::AudioData {
                audio_data: AudioPayload {
                    data: "AAEC".to_string()
                }
            }
        );
    }

    #[test]
    fn test_parse_inbound_other_kinds() {
        let metadata = InboundFrame::parse(
            r#"{"kind":"AudioMetadata","audioMetadata":{"encoding":"PCM","sampleRate":24000}}"#,
        )
        .unwrap();
        assert_eq!(metadata, InboundFrame::Other);
        assert!(InboundFrame::parse(r#"{"audioData":{}}"#).is_err());
        assert!(InboundFrame::parse("garbage").is_err());
    }

    #[test]
    fn test_audio_frame_shape() {
        let frame: Value = serde_json::from_str(&audio_frame(&[0, 1, 2])).unwrap();
        assert_eq!(frame, json!({"kind": "AudioData", "audioData": {"data": "AAEC"}}));
    }

    #[test]
    fn test_stop_audio_frame_exact_text() {
        assert_eq!(
            stop_audio_frame(),
            r#"{"Kind":"StopAudio","AudioData":null,"StopAudio":{}}"#
        );
    }

    #[test]
    fn test_client_frames() {
        let mut transcript = Transcript::new();
        transcript.add_user_message("hello");
        let history: Value = serde_json::from_str(
            &ClientFrame::ChatHistory {
                data: transcript.entries(),
            }
            .to_text()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            history,
            json!({"kind": "ChatHistory", "data": [{"role": "user", "content": "hello"}]})
        );

        let caption: Value = serde_json::from_str(
            &ClientFrame::Transcription {
                data: Caption {
                    speaker: Speaker::Assistant,
                    text: "hi",
                    timestamp: None,
                },
            }
            .to_text()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            caption,
            json!({"kind": "Transcription", "data": {"speaker": "assistant", "text": "hi", "timestamp": null}})
        );

        let error: Value = serde_json::from_str(
            &ClientFrame::Error {
                code: "MCPPluginConnectionError",
                message: "unreachable",
            }
            .to_text()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            error,
            json!({"kind": "Error", "code": "MCPPluginConnectionError", "message": "unreachable"})
        );
    }

    #[tokio::test]
    async fn test_client_channel_reports_closed() {
        let (channel, rx) = ClientChannel::bounded(4);
        channel.send_text("a".to_string()).await.unwrap();
        drop(rx);
        assert!(channel.is_closed());
        assert_eq!(
            channel.send_text("b".to_string()).await,
            Err(ChannelError::Closed)
        );
    }
}
