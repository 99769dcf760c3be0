//! Shared application state.
//!
//! One [`AppState`] is built at startup and handed to every handler. It holds
//! the process-wide resources: configuration, the session registry, the model
//! connection factory, the tool plugin provider and the call automation
//! client. Per-call state never lives here.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::call_automation::{AcsCallAutomation, CallAutomation, CallAutomationError};
use crate::config::ServerConfig;
use crate::core::{
    ModelConnectionFactory, PromptError, PromptTemplate, RealtimeError, SessionRegistry,
    StaticCredentialProvider, VoiceLiveFactory,
};
use crate::plugin::{StandardToolPlugins, ToolPluginProvider};

/// Errors raised while assembling the application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Model credentials: {0}")]
    Credentials(#[from] RealtimeError),

    #[error("Call automation client: {0}")]
    CallAutomation(#[from] CallAutomationError),

    #[error("Agent prompt: {0}")]
    Prompt(#[from] PromptError),
}

/// Reasons a WebSocket connection slot could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

pub struct AppState {
    pub config: ServerConfig,
    pub sessions: Arc<SessionRegistry>,
    pub model_factory: Arc<dyn ModelConnectionFactory>,
    pub tool_plugins: Arc<dyn ToolPluginProvider>,
    pub call_automation: Option<Arc<dyn CallAutomation>>,
    /// Rendered agent instructions, shared by every session
    pub instructions: String,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("address", &self.config.address())
            .field("sessions", &self.sessions.len())
            .field("call_automation", &self.call_automation.is_some())
            .field("ws_connections", &self.ws_connection_count())
            .finish()
    }
}

impl AppState {
    /// Build the production state from configuration.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, StateError> {
        let credentials = StaticCredentialProvider::from_parts(
            config.ai_services_api_key.as_deref(),
            config.ai_services_token.as_deref(),
        )?;
        let model_factory = Arc::new(VoiceLiveFactory::new(
            config.voice_live_config(),
            Arc::new(credentials),
        ));

        let call_automation: Option<Arc<dyn CallAutomation>> =
            match (&config.acs_endpoint, &config.acs_access_key) {
                (Some(endpoint), Some(key)) => {
                    info!("Call automation enabled for {}", endpoint);
                    Some(Arc::new(AcsCallAutomation::new(endpoint, key)?))
                }
                _ => {
                    warn!("Call automation not configured, incoming calls cannot be answered");
                    None
                }
            };

        let template = match &config.agent_prompt_path {
            Some(path) => PromptTemplate::from_file(path)?,
            None => PromptTemplate::default(),
        };
        let instructions = template.render_agent(&config.agent_name);
        let tool_plugins = Arc::new(StandardToolPlugins::new(config.mcp_servers.clone()));

        Ok(Self::with_components(
            config,
            model_factory,
            tool_plugins,
            call_automation,
            instructions,
        ))
    }

    /// Assemble state from explicit components.
    pub fn with_components(
        config: ServerConfig,
        model_factory: Arc<dyn ModelConnectionFactory>,
        tool_plugins: Arc<dyn ToolPluginProvider>,
        call_automation: Option<Arc<dyn CallAutomation>>,
        instructions: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            model_factory,
            tool_plugins,
            call_automation,
            instructions,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    // =========================================================================
    // Connection limits
    // =========================================================================

    /// Reserve a WebSocket slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        // The per-IP entry lock serializes concurrent acquires from one address.
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        let reserved = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match self.config.max_websocket_connections {
                    Some(max) if current >= max => None,
                    _ => Some(current + 1),
                }
            });
        if reserved.is_err() {
            drop(per_ip);
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        *per_ip += 1;
        Ok(())
    }

    /// Return a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        self.ip_connections.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}
