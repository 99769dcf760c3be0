//! Media WebSocket handler.

use axum::{
    Extension,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::CALL_CONNECTION_ID_HEADER;
use super::setup::{start_call, teardown};
use crate::core::frames::{CLOSE_CODE_INTERNAL_ERROR, ClientFrame};
use crate::core::relay::InboundOutcome;
use crate::core::{ClientChannel, OutboundMessage, forward_inbound};
use crate::middleware::ConnectionPermit;
use crate::state::AppState;

/// Outbound frame buffer. Audio dominates; 24 kHz chunks arrive every ~20 ms.
const CHANNEL_BUFFER_SIZE: usize = 512;

/// Maximum WebSocket message size (4 MB)
const MAX_WS_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Normal closure code sent after teardown.
const CLOSE_CODE_NORMAL: u16 = 1000;

/// Telephony media WebSocket handler.
///
/// The `x-ms-call-connection-id` header selects live mode; without it the
/// session runs in development mode.
pub async fn ws_call_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    permit: Option<Extension<ConnectionPermit>>,
) -> Response {
    let call_connection_id = headers
        .get(CALL_CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    info!(
        call_connection_id = ?call_connection_id,
        "Media WebSocket upgrade requested"
    );

    let permit = permit.map(|Extension(permit)| permit);
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_call_socket(socket, state, call_connection_id, permit))
}

/// Run one call session over an upgraded socket.
///
/// Returns once the session is fully torn down. The connection permit is
/// released before the session leaves the registry.
pub async fn handle_call_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    call_connection_id: Option<String>,
    permit: Option<ConnectionPermit>,
) {
    let (ws_sink, mut ws_source) = socket.split();
    let (channel, outbound_rx) = ClientChannel::bounded(CHANNEL_BUFFER_SIZE);
    let writer = tokio::spawn(write_outbound(ws_sink, outbound_rx));

    let guard = state.sessions.register(call_connection_id.clone());
    let session_id = guard.session_id().to_string();

    let mut call = match start_call(&state, &session_id, call_connection_id, channel.clone()).await
    {
        Ok(call) => call,
        Err(e) => {
            error!(session_id = %session_id, "Call session setup failed: {}", e);
            let message = e.to_string();
            let frame = ClientFrame::Error {
                code: e.code(),
                message: &message,
            };
            let _ = channel.send_frame(&frame).await;
            let _ = channel.close(CLOSE_CODE_INTERNAL_ERROR, e.code()).await;
            drop(channel);
            finish_writer(&session_id, writer).await;
            drop(permit);
            return;
        }
    };
    info!(session_id = %session_id, "Call session started");

    let mut receive_finished = false;
    loop {
        tokio::select! {
            message = ws_source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match forward_inbound(text.as_str(), &call.sender).await {
                        Ok(InboundOutcome::Forwarded) | Ok(InboundOutcome::Skipped) => {}
                        Err(e) => {
                            warn!(session_id = %session_id, "Model no longer accepts audio: {}", e);
                            break;
                        }
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(session_id = %session_id, "Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(session_id = %session_id, "Telephony socket closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(session_id = %session_id, "Telephony socket error: {}", e);
                    break;
                }
            },
            result = &mut call.receive_task, if !receive_finished => {
                receive_finished = true;
                match result {
                    Ok(_) => info!(session_id = %session_id, "Model event loop ended"),
                    Err(e) => error!(session_id = %session_id, "Model event loop failed: {}", e),
                }
                break;
            }
        }
    }

    teardown(&session_id, call, receive_finished).await;

    let _ = channel.close(CLOSE_CODE_NORMAL, "session ended").await;
    drop(channel);
    finish_writer(&session_id, writer).await;
    drop(permit);
    drop(guard);
}

async fn finish_writer(session_id: &str, writer: tokio::task::JoinHandle<()>) {
    if let Err(e) = writer.await {
        warn!(session_id = %session_id, "Socket writer task failed: {}", e);
    }
}

/// Drain queued frames into the socket until a close or a write failure.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(message) = outbound_rx.recv().await {
        match message {
            OutboundMessage::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!("Telephony socket write failed: {}", e);
                    break;
                }
            }
            OutboundMessage::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!("Failed to send close frame: {}", e);
                }
                break;
            }
        }
    }
}
