//! Call-control capabilities (`call-*`).
//!
//! In a live session these act on the telephony call through the call
//! automation client. In development mode there is no call behind the
//! session, so they log what they would have done and return mock values.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::plugin::capabilities::{
    Capability, CapabilityRef, PluginError, ToolContext, ToolError, ToolPlugin, object_schema,
    required_str,
};

pub const CALL_NAMESPACE: &str = "call";

/// Number returned when no real caller number can be determined.
pub const TEST_CALLER_NUMBER: &str = "888888888888";

/// Call-control tools.
#[derive(Debug, Default)]
pub struct CallPlugin;

#[async_trait]
impl ToolPlugin for CallPlugin {
    fn namespace(&self) -> &str {
        CALL_NAMESPACE
    }

    async fn connect(&self) -> Result<Vec<CapabilityRef>, PluginError> {
        Ok(vec![
            Arc::new(GetCallerPhoneNumber),
            Arc::new(TransferToHuman),
            Arc::new(Hangup),
        ])
    }
}

// =============================================================================
// get_caller_phone_number
// =============================================================================

pub struct GetCallerPhoneNumber;

#[async_trait]
impl Capability for GetCallerPhoneNumber {
    fn plugin(&self) -> &str {
        CALL_NAMESPACE
    }

    fn name(&self) -> &str {
        "get_caller_phone_number"
    }

    fn description(&self) -> &str {
        "Retrieves the caller's phone number."
    }

    fn parameters(&self) -> Value {
        object_schema(&[], &[])
    }

    async fn execute(&self, _arguments: &Value, context: &ToolContext) -> Result<Value, ToolError> {
        let Some((client, call_connection_id)) = context.live_call() else {
            tracing::warn!(
                session_id = %context.session_id,
                "No call connection available, returning test caller number"
            );
            return Ok(json!(TEST_CALLER_NUMBER));
        };

        let number = match client.get_call_properties(call_connection_id).await {
            Ok(properties) => properties.caller_phone_number().map(str::to_string),
            Err(e) => {
                tracing::warn!(
                    session_id = %context.session_id,
                    "Caller lookup failed: {}",
                    e
                );
                None
            }
        };
        Ok(json!(number.unwrap_or_else(|| TEST_CALLER_NUMBER.to_string())))
    }
}

// =============================================================================
// transfer_to_human
// =============================================================================

pub struct TransferToHuman;

#[async_trait]
impl Capability for TransferToHuman {
    fn plugin(&self) -> &str {
        CALL_NAMESPACE
    }

    fn name(&self) -> &str {
        "transfer_to_human"
    }

    fn description(&self) -> &str {
        "Transfer the call to a human colleague."
    }

    fn parameters(&self) -> Value {
        object_schema(
            &[(
                "call_summary",
                "string",
                "A brief summary of the interaction with the customer for the human agent to review.",
            )],
            &["call_summary"],
        )
    }

    async fn execute(&self, arguments: &Value, context: &ToolContext) -> Result<Value, ToolError> {
        let summary = required_str(arguments, "call_summary")?;
        tracing::info!(
            session_id = %context.session_id,
            "Transfer to human requested with summary: {}",
            summary
        );

        match (context.live_call(), context.transfer_target.as_deref()) {
            (Some((client, call_connection_id)), Some(target)) => {
                client
                    .transfer(call_connection_id, target, "transferToHuman")
                    .await
                    .map_err(|e| ToolError::Execution(e.to_string()))?;
                Ok(json!("The call is being transferred to a human agent."))
            }
            _ => {
                tracing::info!(
                    session_id = %context.session_id,
                    "No live call or transfer target configured, transfer only logged"
                );
                Ok(json!("A human agent has been notified and will follow up."))
            }
        }
    }
}

// =============================================================================
// hangup
// =============================================================================

pub struct Hangup;

#[async_trait]
impl Capability for Hangup {
    fn plugin(&self) -> &str {
        CALL_NAMESPACE
    }

    fn name(&self) -> &str {
        "hangup"
    }

    fn description(&self) -> &str {
        "Ends the call."
    }

    fn parameters(&self) -> Value {
        object_schema(&[], &[])
    }

    async fn execute(&self, _arguments: &Value, context: &ToolContext) -> Result<Value, ToolError> {
        let Some((client, call_connection_id)) = context.live_call() else {
            tracing::warn!(
                session_id = %context.session_id,
                "No call connection ID available to hang up the call"
            );
            return Ok(json!("There is no active call to hang up."));
        };

        client
            .hang_up(call_connection_id, true)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        tracing::info!(session_id = %context.session_id, "Call has been hung up");
        Ok(json!("The call has been ended."))
    }
}
