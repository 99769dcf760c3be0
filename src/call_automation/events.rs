//! Event Grid and call-automation callback payloads.
//!
//! Incoming calls arrive as Event Grid events on `/calls/incoming`; in-call
//! notifications arrive as CloudEvents-style callbacks on
//! `/calls/callbacks/{context_id}`. Both are deserialized loosely and read
//! through the miss-safe accessors in [`crate::core::events`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::events::EventView;

pub const SUBSCRIPTION_VALIDATION_EVENT: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";
pub const INCOMING_CALL_EVENT: &str = "Microsoft.Communication.IncomingCall";

pub const CALL_CONNECTED: &str = "Microsoft.Communication.CallConnected";
pub const CALL_DISCONNECTED: &str = "Microsoft.Communication.CallDisconnected";
pub const MEDIA_STREAMING_STARTED: &str = "Microsoft.Communication.MediaStreamingStarted";
pub const MEDIA_STREAMING_STOPPED: &str = "Microsoft.Communication.MediaStreamingStopped";
pub const MEDIA_STREAMING_FAILED: &str = "Microsoft.Communication.MediaStreamingFailed";

/// One Event Grid event as delivered to the incoming-call webhook.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGridEvent {
    #[serde(default)]
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub data: Value,
}

impl EventGridEvent {
    pub fn view(&self) -> EventView<'_> {
        EventView::new(&self.data)
    }

    /// Validation code of a subscription handshake.
    pub fn validation_code(&self) -> Option<&str> {
        self.view().str("validationCode")
    }

    /// Caller identity of an incoming call.
    ///
    /// Phone callers are identified by their number; anything else by the
    /// raw identifier.
    pub fn caller_id(&self) -> Option<&str> {
        let view = self.view();
        if view.str("from.kind") == Some("phoneNumber") {
            if let Some(number) = view.str("from.phoneNumber.value") {
                return Some(number);
            }
        }
        view.str("from.rawId")
    }

    pub fn incoming_call_context(&self) -> Option<&str> {
        self.view().str("incomingCallContext")
    }
}

/// Response body for a subscription validation handshake.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validation_response: String,
}

/// One in-call notification posted to the callback URI.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl CallbackEvent {
    pub fn view(&self) -> EventView<'_> {
        EventView::new(&self.data)
    }

    pub fn call_connection_id(&self) -> String {
        self.view().display("callConnectionId")
    }

    pub fn correlation_id(&self) -> String {
        self.view().display("correlationId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn incoming(from: Value) -> EventGridEvent {
        serde_json::from_value(json!({
            "id": "evt-1",
            "eventType": INCOMING_CALL_EVENT,
            "subject": "/caller/4:+15550100/recipient/4:+15550199",
            "data": {"from": from, "incomingCallContext": "ctx-token"}
        }))
        .unwrap()
    }

    #[test]
    fn test_caller_id_prefers_phone_number() {
        let event = incoming(json!({
            "kind": "phoneNumber",
            "rawId": "4:+15550100",
            "phoneNumber": {"value": "+15550100"}
        }));
        assert_eq!(event.caller_id(), Some("+15550100"));
        assert_eq!(event.incoming_call_context(), Some("ctx-token"));
    }

    #[test]
    fn test_caller_id_falls_back_to_raw_id() {
        let event = incoming(json!({
            "kind": "communicationUser",
            "rawId": "8:acs:resource_user"
        }));
        assert_eq!(event.caller_id(), Some("8:acs:resource_user"));

        let missing = incoming(json!({}));
        assert_eq!(missing.caller_id(), None);
    }

    #[test]
    fn test_validation_event() {
        let event: EventGridEvent = serde_json::from_value(json!({
            "eventType": SUBSCRIPTION_VALIDATION_EVENT,
            "data": {"validationCode": "512d38b6"}
        }))
        .unwrap();
        assert_eq!(event.validation_code(), Some("512d38b6"));

        let body = serde_json::to_value(ValidationResponse {
            validation_response: "512d38b6".to_string(),
        })
        .unwrap();
        assert_eq!(body, json!({"validationResponse": "512d38b6"}));
    }

    #[test]
    fn test_callback_event_fields() {
        let event: CallbackEvent = serde_json::from_value(json!({
            "type": CALL_CONNECTED,
            "data": {"callConnectionId": "conn-1", "correlationId": "corr-1"}
        }))
        .unwrap();
        assert_eq!(event.call_connection_id(), "conn-1");
        assert_eq!(event.correlation_id(), "corr-1");

        let bare: CallbackEvent =
            serde_json::from_value(json!({"type": CALL_DISCONNECTED})).unwrap();
        assert_eq!(bare.call_connection_id(), "<unknown>");
    }
}
