//! Tool plugin system
//!
//! The model can call functions during a conversation. Functions are grouped
//! into plugins (namespaces); each plugin is connected when a call session
//! starts and exposes a set of capabilities.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Session setup                             │
//! │  ToolPluginProvider ──▶ PluginSet::connect_all ──▶ ToolRegistry   │
//! └──────────────────────────────────────────────────────────────────┘
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        During the call                           │
//! │  ToolCall ──▶ ToolDispatchBridge ──▶ Capability::execute          │
//! │                                   (panic-isolated, own task)     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capabilities are addressed on the wire as `{plugin}-{function}`.
//!
//! # Writing a capability
//!
//! ```ignore
//! use voice_call_bridge::plugin::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Capability for Echo {
//!     fn plugin(&self) -> &str { "demo" }
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Repeat the input" }
//!     fn parameters(&self) -> Value {
//!         object_schema(&[("text", "string", "Text to repeat")], &["text"])
//!     }
//!     async fn execute(&self, arguments: &Value, _: &ToolContext) -> Result<Value, ToolError> {
//!         Ok(Value::String(required_str(arguments, "text")?.to_string()))
//!     }
//! }
//! ```

pub mod builtin;
pub mod capabilities;
pub mod dispatch;
pub mod isolation;
pub mod lifecycle;
pub mod mcp;
pub mod registry;

// Re-exports for convenience
pub use builtin::StandardToolPlugins;
pub use capabilities::{
    Capability, CapabilityRef, PluginError, ToolContext, ToolError, ToolPlugin, ToolSessionState,
};
pub use dispatch::{ToolCall, ToolCompletion, ToolDispatchBridge};
pub use isolation::run_isolated;
pub use lifecycle::{PluginSet, PluginState, ToolPluginProvider};
pub use mcp::{McpPlugin, McpServerConfig};
pub use registry::{ToolRegistry, split_wire_name};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::capabilities::{
        Capability, CapabilityRef, PluginError, ToolContext, ToolError, ToolPlugin,
        object_schema, required_str,
    };

    pub use async_trait::async_trait;
    pub use serde_json::Value;
    pub use std::sync::Arc;
}
