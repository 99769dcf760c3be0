//! Audio relay between the telephony socket and the model connection.
//!
//! The two directions share nothing. Outbound audio is pushed by the model
//! reader task into a [`TelephonyAudioSink`]; inbound frames are forwarded by
//! the connection handler through [`forward_inbound`]. Neither touches the
//! transcript.

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::frames::{ClientChannel, InboundFrame, audio_frame, stop_audio_frame};
use crate::core::realtime::{AudioSink, ModelSender, RealtimeError, RealtimeResult};

/// Writes model audio to the telephony socket as `AudioData` frames.
#[derive(Debug, Clone)]
pub struct TelephonyAudioSink {
    channel: ClientChannel,
}

impl TelephonyAudioSink {
    pub fn new(channel: ClientChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl AudioSink for TelephonyAudioSink {
    async fn play(&self, pcm: Bytes) -> RealtimeResult<()> {
        self.channel
            .send_text(audio_frame(&pcm))
            .await
            .map_err(|_| RealtimeError::SinkClosed)
    }
}

/// Tell the telephony side to drop buffered assistant audio.
pub async fn barge_in(channel: &ClientChannel) {
    if let Err(e) = channel.send_text(stop_audio_frame()).await {
        tracing::warn!("Failed to send StopAudio: {}", e);
    }
}

/// Outcome of handling one inbound telephony frame.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    Forwarded,
    Skipped,
}

/// Forward one inbound text frame to the model.
///
/// Audio is passed on as the base64 text it arrived in. Non-audio and
/// malformed frames are logged and skipped. Only a failure to reach the model
/// is returned as an error.
pub async fn forward_inbound(text: &str, model: &ModelSender) -> RealtimeResult<InboundOutcome> {
    match InboundFrame::parse(text) {
        Ok(InboundFrame::AudioData { audio_data }) => {
            model.append_audio(audio_data.data).await?;
            Ok(InboundOutcome::Forwarded)
        }
        Ok(InboundFrame::Other) => {
            tracing::trace!("Ignoring non-audio telephony frame");
            Ok(InboundOutcome::Skipped)
        }
        Err(e) => {
            tracing::debug!("Dropping malformed telephony frame: {}", e);
            Ok(InboundOutcome::Skipped)
        }
    }
}
