//! Tool Plugin Lifecycle Management
//!
//! Plugins are connected when a call session starts and disconnected when it
//! ends. A session owns a [`PluginSet`] holding only the plugins that
//! connected successfully.
//!
//! # Lifecycle
//!
//! ```text
//!     +-------------+
//!     |  Connecting |  (bounded by the connect timeout)
//!     +------+------+
//!            |
//!     +------+------+
//!     |             |
//!     v             v
//! +---+-------+  +--+-----+
//! | Connected |  | Failed |  (skipped, or setup aborted if mandatory)
//! +---+-------+  +--------+
//!     |
//!     v
//! +---+----------+
//! | Disconnected |  (exactly once, at teardown)
//! +--------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::capabilities::{PluginError, ToolPlugin};
use super::registry::ToolRegistry;

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Connecting,
    Connected,
    Failed,
    Disconnected,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Connecting => write!(f, "connecting"),
            PluginState::Connected => write!(f, "connected"),
            PluginState::Failed => write!(f, "failed"),
            PluginState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Supplies the plugins for a new call session.
pub trait ToolPluginProvider: Send + Sync {
    fn plugins_for_session(&self) -> Vec<Arc<dyn ToolPlugin>>;
}

/// Plugins connected for one session.
#[derive(Default)]
pub struct PluginSet {
    connected: Vec<Arc<dyn ToolPlugin>>,
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.connected.iter().map(|p| p.namespace()))
            .finish()
    }
}

impl PluginSet {
    /// Connect `plugins` in order, each bounded by `timeout`.
    ///
    /// A non-mandatory plugin that fails or times out is skipped. A mandatory
    /// one disconnects whatever was already connected and returns the error.
    pub async fn connect_all(
        plugins: Vec<Arc<dyn ToolPlugin>>,
        timeout: Duration,
    ) -> Result<(PluginSet, ToolRegistry), PluginError> {
        let mut set = PluginSet::default();
        let mut registry = ToolRegistry::new();

        for plugin in plugins {
            let namespace = plugin.namespace().to_string();
            tracing::debug!(plugin = %namespace, state = %PluginState::Connecting, "Connecting tool plugin");

            let result = match tokio::time::timeout(timeout, plugin.connect()).await {
                Ok(result) => result,
                Err(_) => Err(PluginError::Timeout {
                    plugin: namespace.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(capabilities) => {
                    tracing::info!(
                        plugin = %namespace,
                        state = %PluginState::Connected,
                        "Tool plugin connected with {} capabilities",
                        capabilities.len()
                    );
                    registry.extend(capabilities);
                    set.connected.push(plugin);
                }
                Err(e) if plugin.is_mandatory() => {
                    tracing::error!(plugin = %namespace, state = %PluginState::Failed, "Mandatory tool plugin failed: {}", e);
                    set.disconnect_all().await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(plugin = %namespace, state = %PluginState::Failed, "Skipping tool plugin: {}", e);
                }
            }
        }

        Ok((set, registry))
    }

    pub fn len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    /// Disconnect every plugin. Each is disconnected at most once; failures
    /// are logged and do not stop the others.
    pub async fn disconnect_all(&mut self) {
        for plugin in self.connected.drain(..) {
            match plugin.disconnect().await {
                Ok(()) => tracing::debug!(
                    plugin = %plugin.namespace(),
                    state = %PluginState::Disconnected,
                    "Tool plugin disconnected"
                ),
                Err(e) => tracing::warn!(
                    plugin = %plugin.namespace(),
                    "Tool plugin disconnect failed: {}",
                    e
                ),
            }
        }
    }
}
