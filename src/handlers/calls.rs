//! Call automation webhooks.
//!
//! - `POST /calls/incoming` receives Event Grid deliveries: subscription
//!   validation handshakes and incoming call notifications. Incoming calls
//!   are answered with bidirectional media streaming pointed at `/ws`.
//! - `POST /calls/callbacks/{context_id}` receives in-call notifications.
//!   They are logged; the media socket drives the session itself.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::call_automation::events::{
    CALL_CONNECTED, CALL_DISCONNECTED, INCOMING_CALL_EVENT, MEDIA_STREAMING_FAILED,
    MEDIA_STREAMING_STARTED, MEDIA_STREAMING_STOPPED, SUBSCRIPTION_VALIDATION_EVENT,
};
use crate::call_automation::{
    AnswerCallRequest, CallbackEvent, EventGridEvent, MediaStreamingOptions, ValidationResponse,
};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;
use crate::utils::media_stream_url;

/// Operation context attached to answered calls.
const INCOMING_CALL_OPERATION: &str = "incomingCall";

/// Callback URI for one answered call.
pub fn callback_uri(base: &str, context_id: &str, caller_id: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("callerId", caller_id)
        .finish();
    format!("{base}/calls/callbacks/{context_id}?{query}")
}

/// Event Grid webhook for incoming calls.
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    Json(events): Json<Vec<EventGridEvent>>,
) -> AppResult<Response> {
    let base = state.config.callback_base_url().ok_or_else(|| {
        AppError::Misconfigured(
            "AZURE_ACS_CALLBACK_HOST_URI or CONTAINER_APP_HOSTNAME is required".to_string(),
        )
    })?;
    info!("Call event received, callback base {}", base);

    for event in events {
        match event.event_type.as_str() {
            SUBSCRIPTION_VALIDATION_EVENT => {
                info!("Validating Event Grid subscription");
                let code = event.validation_code().ok_or_else(|| {
                    AppError::BadRequest("validation event without validationCode".to_string())
                })?;
                let response = ValidationResponse {
                    validation_response: code.to_string(),
                };
                return Ok(Json(response).into_response());
            }
            INCOMING_CALL_EVENT => answer_incoming_call(&state, &base, &event).await?,
            other => {
                debug!(event_type = %other, data = %event.data, "Event type not handled");
            }
        }
    }

    Ok(StatusCode::OK.into_response())
}

async fn answer_incoming_call(
    state: &AppState,
    base: &str,
    event: &EventGridEvent,
) -> AppResult<()> {
    let client = state.call_automation.as_ref().ok_or_else(|| {
        AppError::Misconfigured("call automation is not configured".to_string())
    })?;
    let caller_id = event.caller_id().unwrap_or_default();
    let incoming_call_context = event.incoming_call_context().ok_or_else(|| {
        AppError::BadRequest("incoming call event without incomingCallContext".to_string())
    })?;
    info!(caller_id = %caller_id, "Incoming call");

    let callback_uri = callback_uri(base, &Uuid::new_v4().to_string(), caller_id);
    let transport_url = media_stream_url(base)
        .map_err(|e| AppError::Misconfigured(format!("invalid callback host: {e}")))?;
    debug!("Callback URI: {}", callback_uri);
    debug!("Media WebSocket URI: {}", transport_url);

    let request = AnswerCallRequest {
        incoming_call_context: incoming_call_context.to_string(),
        callback_uri,
        operation_context: INCOMING_CALL_OPERATION.to_string(),
        media_streaming_options: MediaStreamingOptions::bidirectional_pcm24k(transport_url),
    };
    let answered = client.answer_call(&request).await?;
    info!(
        call_connection_id = %answered.call_connection_id,
        "Answered call"
    );
    Ok(())
}

/// In-call notification webhook.
pub async fn call_callback(
    State(state): State<Arc<AppState>>,
    Path(context_id): Path<String>,
    Json(events): Json<Vec<CallbackEvent>>,
) -> StatusCode {
    for event in events {
        let call_connection_id = event.call_connection_id();
        debug!(
            event_type = %event.event_type,
            correlation_id = %event.correlation_id(),
            context_id = %context_id,
            call_connection_id = %call_connection_id,
            "Received call event"
        );
        let view = event.view();

        match event.event_type.as_str() {
            CALL_CONNECTED => {
                info!(call_connection_id = %call_connection_id, "Call connected");
                if let Some(client) = &state.call_automation {
                    match client.get_call_properties(&call_connection_id).await {
                        Ok(properties) => info!(
                            call_connection_id = %call_connection_id,
                            subscription = ?properties.media_streaming_subscription,
                            "Media streaming subscription"
                        ),
                        Err(e) => warn!(
                            call_connection_id = %call_connection_id,
                            "Failed to fetch call properties: {}", e
                        ),
                    }
                }
            }
            MEDIA_STREAMING_STARTED | MEDIA_STREAMING_STOPPED => debug!(
                call_connection_id = %call_connection_id,
                content_type = %view.display("mediaStreamingUpdate.contentType"),
                status = %view.display("mediaStreamingUpdate.mediaStreamingStatus"),
                details = %view.display("mediaStreamingUpdate.mediaStreamingStatusDetails"),
                "Media streaming update"
            ),
            MEDIA_STREAMING_FAILED => warn!(
                call_connection_id = %call_connection_id,
                code = %view.display("resultInformation.code"),
                sub_code = %view.display("resultInformation.subCode"),
                message = %view.display("resultInformation.message"),
                "Media streaming failed"
            ),
            CALL_DISCONNECTED => {
                info!(call_connection_id = %call_connection_id, "Call disconnected")
            }
            other => debug!(event_type = %other, "Call event not handled"),
        }
    }
    StatusCode::OK
}
