//! Tool Capability Traits
//!
//! This module defines the contract between the tool dispatch bridge and the
//! code that implements tools. A [`ToolPlugin`] is a namespace that is
//! connected once per call session and yields a set of [`Capability`] objects,
//! one per callable function.
//!
//! # Capability-Based Design
//!
//! Capabilities are stateless. Anything that must survive between two calls
//! within a session (the verified order number, the call identity) lives in
//! the [`ToolContext`] handed to every execution, so one capability object can
//! serve any session.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::call_automation::CallAutomation;

// =============================================================================
// Errors
// =============================================================================

/// Error returned by a single tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// A required earlier step has not happened yet
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Arguments did not match the declared schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed
    #[error("Tool execution failed: {0}")]
    Execution(String),

    /// No capability is registered under the requested name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    /// Whether the error is reported back to the model as an ordinary result.
    ///
    /// Precondition and argument errors are something the model can fix on its
    /// next turn. Everything else takes the recovery path.
    pub fn is_relayed_to_model(&self) -> bool {
        matches!(
            self,
            ToolError::Precondition(_) | ToolError::InvalidArguments(_)
        )
    }

    /// Text written into the `function_call_output` item.
    pub fn to_model_output(&self) -> String {
        self.to_string()
    }
}

/// Error raised while connecting or disconnecting a tool plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin '{plugin}' failed to connect: {reason}")]
    ConnectionFailed { plugin: String, reason: String },

    #[error("Plugin '{plugin}' timed out after {timeout_ms}ms")]
    Timeout { plugin: String, timeout_ms: u64 },

    #[error("Plugin protocol error: {0}")]
    Protocol(String),
}

impl PluginError {
    pub fn plugin(&self) -> Option<&str> {
        match self {
            PluginError::ConnectionFailed { plugin, .. } | PluginError::Timeout { plugin, .. } => {
                Some(plugin)
            }
            PluginError::Protocol(_) => None,
        }
    }
}

// =============================================================================
// Per-session context
// =============================================================================

/// Mutable tool state scoped to one conversation.
#[derive(Debug, Default)]
pub struct ToolSessionState {
    verified_order: Mutex<Option<String>>,
}

impl ToolSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the caller proved ownership of `order_number`.
    pub fn verify(&self, order_number: impl Into<String>) {
        *self.verified_order.lock() = Some(order_number.into());
    }

    pub fn verified_order(&self) -> Option<String> {
        self.verified_order.lock().clone()
    }

    pub fn is_verified(&self) -> bool {
        self.verified_order.lock().is_some()
    }
}

/// Everything a capability may need to know about the session it runs in.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Present for live telephony sessions
    pub call_connection_id: Option<String>,
    pub call_automation: Option<Arc<dyn CallAutomation>>,
    /// PSTN number used by `transfer_to_human`
    pub transfer_target: Option<String>,
    pub state: Arc<ToolSessionState>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("call_connection_id", &self.call_connection_id)
            .field("call_automation", &self.call_automation.is_some())
            .field("transfer_target", &self.transfer_target)
            .field("state", &self.state)
            .finish()
    }
}

impl ToolContext {
    /// Context for a session with no telephony call behind it.
    pub fn development(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            call_connection_id: None,
            call_automation: None,
            transfer_target: None,
            state: Arc::new(ToolSessionState::new()),
        }
    }

    pub fn is_development_mode(&self) -> bool {
        self.call_connection_id.is_none()
    }

    /// Call automation client and connection id, when both are available.
    pub fn live_call(&self) -> Option<(&Arc<dyn CallAutomation>, &str)> {
        match (&self.call_automation, &self.call_connection_id) {
            (Some(client), Some(id)) => Some((client, id.as_str())),
            _ => None,
        }
    }
}

// =============================================================================
// Capability
// =============================================================================

/// One function the model may call.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Plugin namespace, e.g. `delivery`
    fn plugin(&self) -> &str;

    /// Function name within the namespace, e.g. `schedule_delivery`
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the arguments object
    fn parameters(&self) -> Value;

    /// Normalize model-supplied arguments before execution.
    ///
    /// The default accepts an object (or nothing) and rejects anything else.
    /// Implementations fill in defaults here so the transcript can show the
    /// arguments that were actually used.
    fn bind_arguments(&self, arguments: &Value) -> Result<Value, ToolError> {
        match arguments {
            Value::Null => Ok(Value::Object(Map::new())),
            Value::Object(_) => Ok(arguments.clone()),
            other => Err(ToolError::InvalidArguments(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    async fn execute(&self, arguments: &Value, context: &ToolContext) -> Result<Value, ToolError>;

    /// Name advertised to the model.
    fn wire_name(&self) -> String {
        format!("{}-{}", self.plugin(), self.name())
    }
}

/// Shared capability handle.
pub type CapabilityRef = Arc<dyn Capability>;

// =============================================================================
// Tool Plugin
// =============================================================================

/// A namespace of capabilities with a per-session connection lifecycle.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    fn namespace(&self) -> &str;

    /// A mandatory plugin that fails to connect aborts session setup.
    fn is_mandatory(&self) -> bool {
        false
    }

    /// Connect and list the capabilities this plugin offers.
    async fn connect(&self) -> Result<Vec<CapabilityRef>, PluginError>;

    /// Release whatever `connect` acquired.
    async fn disconnect(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

/// Read a required string argument.
pub fn required_str<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    match arguments.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{name}' must be a string, got {other}"
        ))),
        None => Err(ToolError::InvalidArguments(format!("'{name}' is required"))),
    }
}

/// Build an object schema from `(name, type, description)` triples.
pub fn object_schema(properties: &[(&str, &str, &str)], required: &[&str]) -> Value {
    let props: Map<String, Value> = properties
        .iter()
        .map(|(name, ty, description)| {
            (
                name.to_string(),
                serde_json::json!({"type": ty, "description": description}),
            )
        })
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}
