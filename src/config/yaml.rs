use serde::Deserialize;
use std::path::Path;

use super::ConfigError;
use crate::plugin::McpServerConfig;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration; anything set here overrides
/// the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8000
///   tls:
///     enabled: true
///     cert_path: "/etc/bridge/cert.pem"
///     key_path: "/etc/bridge/key.pem"
///
/// model:
///   endpoint: "https://my-resource.cognitiveservices.azure.com/"
///   api_key: "your-key"
///   deployment: "gpt-4o-realtime-preview"
///   voice: "en-US-Andrew:DragonHDLatestNeural"
///   vad_threshold: 0.8
///   silence_duration_ms: 800
///   reconnect_attempts: 0
///
/// acs:
///   endpoint: "https://my-acs.communication.azure.com"
///   access_key: "base64-key"
///   callback_host_uri: "https://bridge.example.com"
///   transfer_target: "+15550123"
///
/// agent:
///   name: "Sam"
///   prompt_path: "prompts/agent.yaml"
///
/// tools:
///   connect_timeout_ms: 5000
///   record_invocations: false
///   mcp_servers:
///     - name: orders
///       url: "https://orders.example.com/mcp"
///       mandatory: true
///
/// security:
///   cors_allowed_origins: "*"
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub model: Option<ModelYaml>,
    pub acs: Option<AcsYaml>,
    pub agent: Option<AgentYaml>,
    pub tools: Option<ToolsYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Model endpoint and session tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ModelYaml {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub voice: Option<String>,
    /// e.g. `azure-standard`
    pub voice_type: Option<String>,
    /// Server VAD threshold (0.0 - 1.0)
    pub vad_threshold: Option<f32>,
    pub silence_duration_ms: Option<u32>,
    pub noise_reduction: Option<String>,
    pub echo_cancellation: Option<String>,
    pub input_transcription_model: Option<String>,
    pub reconnect_attempts: Option<u32>,
}

/// Call automation configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AcsYaml {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub callback_host_uri: Option<String>,
    pub transfer_target: Option<String>,
}

/// Agent configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentYaml {
    pub name: Option<String>,
    pub prompt_path: Option<String>,
}

/// Tool plugin configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub connect_timeout_ms: Option<u64>,
    pub record_invocations: Option<bool>,
    /// Replaces any server configured through the environment when present
    pub mcp_servers: Option<Vec<McpServerConfig>>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
