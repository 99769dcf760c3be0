//! Bridge configuration.
//!
//! [`ServerConfig`] covers the listener, the Voice Live model session, call
//! automation, the agent prompt, tool backends and the security layers.
//! Sources in priority order: YAML file, environment, `.env` (loaded by the
//! binary), built-in defaults. The merged result is validated before use.
//!
//! - `env`: reads the environment
//! - `yaml`: the file schema
//! - `merge`: YAML overrides on top of the environment
//! - `validation`: endpoint, callback host and tool server checks
//!
//! ```rust,no_run
//! use std::path::Path;
//! use voice_call_bridge::config::ServerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_file(Path::new("bridge.yaml"))?;
//! let voice_live = config.voice_live_config();
//! println!("{} via {}", voice_live.deployment, config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::{ReconnectionConfig, VoiceLiveConfig};
use crate::core::realtime::voice_live::{
    DEFAULT_API_VERSION, DEFAULT_DEPLOYMENT, DEFAULT_VOICE, DEFAULT_VOICE_TYPE,
};
use crate::plugin::McpServerConfig;

/// Default plugin connect timeout.
pub const DEFAULT_TOOL_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the bridge, including:
/// - Server settings (host, port, TLS)
/// - Model endpoint and Voice Live session tuning
/// - Call automation (telephony) settings
/// - Agent prompt and tool plugins
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Model settings
    /// AI services endpoint, `https://<resource>.cognitiveservices.azure.com/`
    pub ai_services_endpoint: String,
    pub ai_services_api_key: Option<String>,
    /// Pre-issued bearer token, used when no API key is set
    pub ai_services_token: Option<String>,
    pub voice_live_deployment: String,
    pub voice_live_api_version: String,
    pub voice: String,
    pub voice_type: String,
    pub vad_threshold: f32,
    pub silence_duration_ms: u32,
    pub noise_reduction: String,
    pub echo_cancellation: String,
    pub input_transcription_model: Option<String>,
    /// Zero disables reconnection
    pub reconnect_attempts: u32,

    // Call automation settings
    pub acs_endpoint: Option<String>,
    /// Base64 access key for HMAC request signing
    pub acs_access_key: Option<String>,
    /// Public base URL used for callbacks and the media stream
    pub callback_host_uri: Option<String>,
    /// Hostname assigned by the container platform, fallback callback host
    pub container_app_hostname: Option<String>,
    /// Phone number calls are transferred to
    pub transfer_target: Option<String>,

    // Agent settings
    pub agent_name: String,
    pub agent_prompt_path: Option<PathBuf>,

    // Tool settings
    pub mcp_servers: Vec<McpServerConfig>,
    pub tool_connect_timeout_ms: u64,
    pub record_invocations: bool,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            tls: None,
            ai_services_endpoint: String::new(),
            ai_services_api_key: None,
            ai_services_token: None,
            voice_live_deployment: DEFAULT_DEPLOYMENT.to_string(),
            voice_live_api_version: DEFAULT_API_VERSION.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            voice_type: DEFAULT_VOICE_TYPE.to_string(),
            vad_threshold: 0.8,
            silence_duration_ms: 800,
            noise_reduction: "azure_deep_noise_suppression".to_string(),
            echo_cancellation: "server_echo_cancellation".to_string(),
            input_transcription_model: None,
            reconnect_attempts: 0,
            acs_endpoint: None,
            acs_access_key: None,
            callback_host_uri: None,
            container_app_hostname: None,
            transfer_target: None,
            agent_name: crate::core::prompt::DEFAULT_AGENT_NAME.to_string(),
            agent_prompt_path: None,
            mcp_servers: Vec::new(),
            tool_connect_timeout_ms: DEFAULT_TOOL_CONNECT_TIMEOUT_MS,
            record_invocations: false,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.ai_services_api_key {
            key.zeroize();
        }
        if let Some(ref mut token) = self.ai_services_token {
            token.zeroize();
        }
        if let Some(ref mut key) = self.acs_access_key {
            key.zeroize();
        }
        for server in &mut self.mcp_servers {
            for value in server.headers.values_mut() {
                value.zeroize();
            }
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded in main.rs at application startup, so its values
    /// are already visible as environment variables here.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if the call automation client can be built
    pub fn has_call_automation(&self) -> bool {
        self.acs_endpoint.is_some() && self.acs_access_key.is_some()
    }

    /// Public base URL for call automation callbacks.
    ///
    /// `callback_host_uri` wins; otherwise `https://<container hostname>`.
    /// Trailing slashes are removed.
    pub fn callback_base_url(&self) -> Option<String> {
        let base = match (&self.callback_host_uri, &self.container_app_hostname) {
            (Some(uri), _) => uri.clone(),
            (None, Some(hostname)) => format!("https://{hostname}"),
            (None, None) => return None,
        };
        Some(base.trim_end_matches('/').to_string())
    }

    pub fn tool_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_connect_timeout_ms)
    }

    /// Voice Live session settings derived from this configuration
    pub fn voice_live_config(&self) -> VoiceLiveConfig {
        VoiceLiveConfig {
            endpoint: self.ai_services_endpoint.clone(),
            deployment: self.voice_live_deployment.clone(),
            api_version: self.voice_live_api_version.clone(),
            voice: self.voice.clone(),
            voice_type: self.voice_type.clone(),
            vad_threshold: self.vad_threshold,
            silence_duration_ms: self.silence_duration_ms,
            noise_reduction: self.noise_reduction.clone(),
            echo_cancellation: self.echo_cancellation.clone(),
            input_transcription_model: self.input_transcription_model.clone(),
            reconnection: ReconnectionConfig::with_attempts(self.reconnect_attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        for name in env::ENV_VARS {
            unsafe {
                std::env::remove_var(name);
            }
        }
    }

    fn set_env(name: &str, value: &str) {
        unsafe {
            std::env::set_var(name, value);
        }
    }

    #[test]
    fn test_address_and_tls() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "0.0.0.0:8000");
        assert!(!config.is_tls_enabled());
        assert!(!config.has_call_automation());
    }

    #[test]
    fn test_callback_base_url_priority() {
        let mut config = ServerConfig::default();
        config.container_app_hostname = Some("bridge.azurecontainerapps.io".to_string());
        assert_eq!(
            config.callback_base_url().as_deref(),
            Some("https://bridge.azurecontainerapps.io")
        );

        config.callback_host_uri = Some("https://abc.ngrok.app/".to_string());
        assert_eq!(
            config.callback_base_url().as_deref(),
            Some("https://abc.ngrok.app")
        );

        let none = ServerConfig::default();
        assert!(none.callback_base_url().is_none());
    }

    #[test]
    fn test_voice_live_config_mapping() {
        let mut config = ServerConfig::default();
        config.ai_services_endpoint = "https://res.cognitiveservices.azure.com/".to_string();
        config.reconnect_attempts = 3;
        config.input_transcription_model = Some("whisper-1".to_string());
        let voice_live = config.voice_live_config();
        assert_eq!(voice_live.endpoint, config.ai_services_endpoint);
        assert_eq!(voice_live.deployment, DEFAULT_DEPLOYMENT);
        assert_eq!(voice_live.vad_threshold, 0.8);
        assert_eq!(voice_live.silence_duration_ms, 800);
        assert_eq!(voice_live.input_transcription_model.as_deref(), Some("whisper-1"));
        assert!(voice_live.reconnection.is_enabled());
        assert_eq!(voice_live.reconnection.max_attempts, 3);

        assert!(!ServerConfig::default().voice_live_config().reconnection.is_enabled());
    }

    #[test]
    #[serial]
    fn test_from_env_requires_endpoint() {
        cleanup_env_vars();
        let result = ServerConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::Missing("AZURE_AI_SERVICES_ENDPOINT"))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        set_env("AZURE_AI_SERVICES_ENDPOINT", "https://res.cognitiveservices.azure.com/");
        set_env("AZURE_AI_SERVICES_API_KEY", "key");

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.agent_name, "Sam");
        assert_eq!(config.tool_connect_timeout_ms, 5000);
        assert!(config.mcp_servers.is_empty());
        assert!(!config.record_invocations);
        assert_eq!(config.rate_limit_requests_per_second, 60);
        assert_eq!(config.max_connections_per_ip, 100);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_full() {
        cleanup_env_vars();
        set_env("HOST", "127.0.0.1");
        set_env("PORT", "9000");
        set_env("AZURE_AI_SERVICES_ENDPOINT", "https://res.cognitiveservices.azure.com/");
        set_env("AZURE_AI_SERVICES_TOKEN", "token");
        set_env("VOICE_LIVE_VOICE", "en-US-Ava:DragonHDLatestNeural");
        set_env("AZURE_ACS_ENDPOINT", "https://acs.communication.azure.com");
        set_env("AZURE_ACS_ACCESS_KEY", "c2VjcmV0");
        set_env("AZURE_ACS_CALLBACK_HOST_URI", "https://abc.ngrok.app");
        set_env("HUMAN_AGENT_PHONE_NUMBER", "+15550123");
        set_env("AGENT_NAME", "Ava");
        set_env("MCP_ORDERS_URL", "http://localhost:9000/mcp");
        set_env("TOOL_CONNECT_TIMEOUT_MS", "2500");
        set_env("MAX_WEBSOCKET_CONNECTIONS", "50");
        set_env("MAX_CONNECTIONS_PER_IP", "4");

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.address(), "127.0.0.1:9000");
        assert_eq!(config.ai_services_token.as_deref(), Some("token"));
        assert_eq!(config.voice, "en-US-Ava:DragonHDLatestNeural");
        assert!(config.has_call_automation());
        assert_eq!(config.transfer_target.as_deref(), Some("+15550123"));
        assert_eq!(config.agent_name, "Ava");
        assert_eq!(config.mcp_servers.len(), 1);
        assert_eq!(config.mcp_servers[0].name, "orders");
        assert!(config.mcp_servers[0].mandatory);
        assert_eq!(config.tool_connect_timeout(), Duration::from_millis(2500));
        assert_eq!(config.max_websocket_connections, Some(50));
        assert_eq!(config.max_connections_per_ip, 4usize);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        set_env("AZURE_AI_SERVICES_ENDPOINT", "https://res.cognitiveservices.azure.com/");
        set_env("PORT", "not-a-port");

        let result = ServerConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { ref name, .. }) if name == "PORT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        set_env("AZURE_AI_SERVICES_ENDPOINT", "https://env.cognitiveservices.azure.com/");
        set_env("PORT", "7000");
        set_env("AGENT_NAME", "FromEnv");

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
server:
  port: 3001
model:
  endpoint: "https://yaml.cognitiveservices.azure.com/"
  api_key: "yaml-key"
  vad_threshold: 0.5
  reconnect_attempts: 2
agent:
  name: "Max"
tools:
  connect_timeout_ms: 1000
  record_invocations: true
  mcp_servers:
    - name: orders
      url: "https://orders.example.com/mcp"
    - name: crm
      url: "https://crm.example.com/mcp"
      mandatory: false
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(
            config.ai_services_endpoint,
            "https://yaml.cognitiveservices.azure.com/"
        );
        assert_eq!(config.ai_services_api_key.as_deref(), Some("yaml-key"));
        assert_eq!(config.vad_threshold, 0.5);
        assert_eq!(config.reconnect_attempts, 2);
        assert_eq!(config.agent_name, "Max");
        assert!(config.record_invocations);
        assert_eq!(config.tool_connect_timeout_ms, 1000);
        assert_eq!(config.mcp_servers.len(), 2);
        assert!(!config.mcp_servers[1].mandatory);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();
        let result = ServerConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    #[serial]
    fn test_from_file_validation_failure() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
model:
  endpoint: "https://res.cognitiveservices.azure.com/"
  vad_threshold: 1.5
"#,
        )
        .unwrap();

        let result = ServerConfig::from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("vad_threshold")));
    }
}
