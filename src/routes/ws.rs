//! Media WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws_call_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade for a telephony media stream
///
/// # Protocol
///
/// JSON text frames in both directions:
/// - inbound `{"kind":"AudioData","audioData":{"data":"<base64 PCM>"}}`
/// - outbound `AudioData`, `StopAudio`, `ChatHistory`, `Transcription`,
///   `AgentError` and `Error` frames
///
/// The optional `x-ms-call-connection-id` header marks a live call.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws_call_handler))
        .layer(TraceLayer::new_for_http())
}
