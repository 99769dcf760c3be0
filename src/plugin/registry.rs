//! Tool Registry
//!
//! Per-session index of the capabilities offered by connected plugins, keyed
//! by wire name (`{plugin}-{function}`). Insertion order is kept so the tool
//! list sent to the model is stable across sessions.

use std::collections::HashMap;

use super::capabilities::CapabilityRef;
use crate::core::realtime::ToolDefinition;

#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, CapabilityRef>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. A later registration under the same wire name
    /// replaces the earlier one and keeps its position.
    pub fn register(&mut self, capability: CapabilityRef) {
        let wire_name = capability.wire_name();
        if self.tools.insert(wire_name.clone(), capability).is_some() {
            tracing::warn!("Tool '{}' registered twice, keeping the latest", wire_name);
        } else {
            self.order.push(wire_name);
        }
    }

    pub fn extend(&mut self, capabilities: impl IntoIterator<Item = CapabilityRef>) {
        for capability in capabilities {
            self.register(capability);
        }
    }

    pub fn get(&self, wire_name: &str) -> Option<&CapabilityRef> {
        self.tools.get(wire_name)
    }

    /// Tool definitions for the session configuration, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.wire_name(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Split a wire name into `(plugin, function)`.
///
/// Names without a separator have an empty plugin part.
pub fn split_wire_name(wire_name: &str) -> (&str, &str) {
    wire_name.split_once('-').unwrap_or(("", wire_name))
}
