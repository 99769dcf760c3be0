//! Environment variable loading.

use std::path::PathBuf;

use super::utils::{env_var, parse_bool, parse_env, parse_optional_env};
use super::{ConfigError, ServerConfig, TlsConfig};
use crate::plugin::McpServerConfig;

/// Namespace of the MCP server configured through `MCP_ORDERS_URL`.
pub(super) const ORDERS_MCP_NAMESPACE: &str = "orders";

/// Every variable the loader reads.
#[cfg(test)]
pub(super) const ENV_VARS: &[&str] = &[
    "HOST",
    "PORT",
    "TLS_CERT_PATH",
    "TLS_KEY_PATH",
    "AZURE_AI_SERVICES_ENDPOINT",
    "AZURE_AI_SERVICES_API_KEY",
    "AZURE_AI_SERVICES_TOKEN",
    "VOICE_LIVE_DEPLOYMENT",
    "VOICE_LIVE_API_VERSION",
    "VOICE_LIVE_VOICE",
    "VOICE_LIVE_TRANSCRIPTION_MODEL",
    "AZURE_ACS_ENDPOINT",
    "AZURE_ACS_ACCESS_KEY",
    "AZURE_ACS_CALLBACK_HOST_URI",
    "CONTAINER_APP_HOSTNAME",
    "HUMAN_AGENT_PHONE_NUMBER",
    "AGENT_NAME",
    "AGENT_PROMPT_PATH",
    "MCP_ORDERS_URL",
    "MCP_ORDERS_MANDATORY",
    "TOOL_CONNECT_TIMEOUT_MS",
    "CORS_ALLOWED_ORIGINS",
    "RATE_LIMIT_REQUESTS_PER_SECOND",
    "RATE_LIMIT_BURST_SIZE",
    "MAX_WEBSOCKET_CONNECTIONS",
    "MAX_CONNECTIONS_PER_IP",
];

/// Build a configuration from defaults and environment variables.
///
/// Required values are not checked here; YAML may still supply them.
pub(super) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_var("HOST") {
        config.host = host;
    }
    config.port = parse_env("PORT", config.port)?;
    config.tls = tls_from_env()?;

    if let Some(endpoint) = env_var("AZURE_AI_SERVICES_ENDPOINT") {
        config.ai_services_endpoint = endpoint;
    }
    config.ai_services_api_key = env_var("AZURE_AI_SERVICES_API_KEY");
    config.ai_services_token = env_var("AZURE_AI_SERVICES_TOKEN");
    if let Some(deployment) = env_var("VOICE_LIVE_DEPLOYMENT") {
        config.voice_live_deployment = deployment;
    }
    if let Some(api_version) = env_var("VOICE_LIVE_API_VERSION") {
        config.voice_live_api_version = api_version;
    }
    if let Some(voice) = env_var("VOICE_LIVE_VOICE") {
        config.voice = voice;
    }
    config.input_transcription_model = env_var("VOICE_LIVE_TRANSCRIPTION_MODEL");

    config.acs_endpoint = env_var("AZURE_ACS_ENDPOINT");
    config.acs_access_key = env_var("AZURE_ACS_ACCESS_KEY");
    config.callback_host_uri = env_var("AZURE_ACS_CALLBACK_HOST_URI");
    config.container_app_hostname = env_var("CONTAINER_APP_HOSTNAME");
    config.transfer_target = env_var("HUMAN_AGENT_PHONE_NUMBER");

    if let Some(name) = env_var("AGENT_NAME") {
        config.agent_name = name;
    }
    config.agent_prompt_path = env_var("AGENT_PROMPT_PATH").map(PathBuf::from);

    if let Some(url) = env_var("MCP_ORDERS_URL") {
        let mut server = McpServerConfig::new(ORDERS_MCP_NAMESPACE, url);
        if let Some(flag) = env_var("MCP_ORDERS_MANDATORY") {
            server.mandatory = parse_bool("MCP_ORDERS_MANDATORY", &flag)?;
        }
        config.mcp_servers.push(server);
    }
    config.tool_connect_timeout_ms =
        parse_env("TOOL_CONNECT_TIMEOUT_MS", config.tool_connect_timeout_ms)?;

    config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
    config.rate_limit_requests_per_second = parse_env(
        "RATE_LIMIT_REQUESTS_PER_SECOND",
        config.rate_limit_requests_per_second,
    )?;
    config.rate_limit_burst_size = parse_env("RATE_LIMIT_BURST_SIZE", config.rate_limit_burst_size)?;
    config.max_websocket_connections = parse_optional_env("MAX_WEBSOCKET_CONNECTIONS")?;
    config.max_connections_per_ip =
        parse_env("MAX_CONNECTIONS_PER_IP", config.max_connections_per_ip)?;

    Ok(config)
}

fn tls_from_env() -> Result<Option<TlsConfig>, ConfigError> {
    match (env_var("TLS_CERT_PATH"), env_var("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        })),
        (None, None) => Ok(None),
        _ => Err(ConfigError::Validation(
            "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup() {
        for name in ENV_VARS {
            unsafe {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_tls_requires_both_paths() {
        cleanup();
        unsafe {
            std::env::set_var("TLS_CERT_PATH", "/certs/cert.pem");
        }
        assert!(matches!(load_from_env(), Err(ConfigError::Validation(_))));

        unsafe {
            std::env::set_var("TLS_KEY_PATH", "/certs/key.pem");
        }
        let config = load_from_env().unwrap();
        assert!(config.is_tls_enabled());
        cleanup();
    }

    #[test]
    #[serial]
    fn test_orders_server_mandatory_flag() {
        cleanup();
        unsafe {
            std::env::set_var("MCP_ORDERS_URL", "http://localhost:9000/mcp");
            std::env::set_var("MCP_ORDERS_MANDATORY", "false");
        }
        let config = load_from_env().unwrap();
        assert_eq!(config.mcp_servers[0].name, ORDERS_MCP_NAMESPACE);
        assert!(!config.mcp_servers[0].mandatory);
        cleanup();
    }
}
