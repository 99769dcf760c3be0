//! Built-in tool plugins
//!
//! Every session gets the same plugin line-up: call control, delivery
//! scheduling and one remote plugin per configured MCP server.
//!
//! # Plugins
//!
//! - `call`: caller lookup, transfer to a human, hang up
//! - `delivery`: identity verification, slot lookup, scheduling
//! - one namespace per MCP server (e.g. `orders`)

pub mod call;
pub mod delivery;

pub use call::{CALL_NAMESPACE, CallPlugin};
pub use delivery::{DELIVERY_NAMESPACE, DeliveryPlugin};

use std::sync::Arc;

use super::capabilities::ToolPlugin;
use super::lifecycle::ToolPluginProvider;
use super::mcp::{McpPlugin, McpServerConfig};

/// Plugin provider used by the server.
///
/// MCP plugins are created fresh per session since each holds its own
/// protocol session; the HTTP client underneath is shared.
#[derive(Debug, Clone)]
pub struct StandardToolPlugins {
    mcp_servers: Vec<McpServerConfig>,
    http: reqwest::Client,
}

impl StandardToolPlugins {
    pub fn new(mcp_servers: Vec<McpServerConfig>) -> Self {
        Self::with_client(mcp_servers, reqwest::Client::new())
    }

    pub fn with_client(mcp_servers: Vec<McpServerConfig>, http: reqwest::Client) -> Self {
        Self { mcp_servers, http }
    }

    pub fn mcp_servers(&self) -> &[McpServerConfig] {
        &self.mcp_servers
    }
}

impl ToolPluginProvider for StandardToolPlugins {
    fn plugins_for_session(&self) -> Vec<Arc<dyn ToolPlugin>> {
        let mut plugins: Vec<Arc<dyn ToolPlugin>> =
            vec![Arc::new(CallPlugin), Arc::new(DeliveryPlugin)];
        for server in &self.mcp_servers {
            plugins.push(Arc::new(McpPlugin::new(server.clone(), self.http.clone())));
        }
        plugins
    }
}
