//! Configuration validation, run after YAML and environment are merged.

use std::collections::HashSet;

use super::{ConfigError, ServerConfig};
use crate::utils::{validate_callback_host, validate_service_url};

/// Validate the merged configuration.
pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_endpoint(&config.ai_services_endpoint)?;
    validate_vad_threshold(config.vad_threshold)?;
    if let Some(uri) = &config.callback_host_uri {
        validate_callback_host(uri).map_err(|e| {
            ConfigError::Validation(format!("callback host URI '{uri}' is invalid: {e}"))
        })?;
    }
    if let Some(endpoint) = &config.acs_endpoint {
        validate_service_url(endpoint).map_err(|e| {
            ConfigError::Validation(format!("ACS endpoint '{endpoint}' is invalid: {e}"))
        })?;
    }
    validate_mcp_servers(config)?;
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    if endpoint.trim().is_empty() {
        return Err(ConfigError::Missing("AZURE_AI_SERVICES_ENDPOINT"));
    }
    validate_service_url(endpoint).map_err(|e| {
        ConfigError::Validation(format!("AI services endpoint '{endpoint}' is invalid: {e}"))
    })?;
    Ok(())
}

fn validate_vad_threshold(threshold: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation(format!(
            "vad_threshold must be between 0.0 and 1.0, got {threshold}"
        )));
    }
    Ok(())
}

/// Server names become tool namespaces, so they must be unique, non-empty and
/// free of the `-` separator used in wire names.
fn validate_mcp_servers(config: &ServerConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for server in &config.mcp_servers {
        if server.name.is_empty() || server.name.contains('-') {
            return Err(ConfigError::Validation(format!(
                "MCP server name '{}' must be non-empty and must not contain '-'",
                server.name
            )));
        }
        if !seen.insert(server.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate MCP server name '{}'",
                server.name
            )));
        }
        validate_service_url(&server.url).map_err(|e| {
            ConfigError::Validation(format!(
                "MCP server '{}' URL '{}' is invalid: {e}",
                server.name, server.url
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::McpServerConfig;

    fn valid_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.ai_services_endpoint = "https://res.cognitiveservices.azure.com/".to_string();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_endpoint_required_and_http() {
        let mut config = valid_config();
        config.ai_services_endpoint = String::new();
        assert!(matches!(validate(&config), Err(ConfigError::Missing(_))));

        config.ai_services_endpoint = "ftp://res.example.com".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_vad_threshold_range() {
        let mut config = valid_config();
        config.vad_threshold = 0.0;
        assert!(validate(&config).is_ok());
        config.vad_threshold = 1.0;
        assert!(validate(&config).is_ok());
        config.vad_threshold = -0.1;
        assert!(validate(&config).is_err());
        config.vad_threshold = f32::NAN;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_callback_host_must_be_https() {
        let mut config = valid_config();
        config.callback_host_uri = Some("http://abc.ngrok.app".to_string());
        assert!(validate(&config).is_err());
        config.callback_host_uri = Some("https://abc.ngrok.app".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_mcp_server_rules() {
        let mut config = valid_config();
        config.mcp_servers = vec![McpServerConfig::new("orders", "not a url")];
        assert!(validate(&config).is_err());

        config.mcp_servers = vec![McpServerConfig::new("order-api", "http://localhost/mcp")];
        assert!(validate(&config).is_err());

        config.mcp_servers = vec![
            McpServerConfig::new("orders", "http://localhost/mcp"),
            McpServerConfig::new("orders", "http://localhost/other"),
        ];
        assert!(validate(&config).is_err());

        config.mcp_servers = vec![McpServerConfig::new("orders", "http://localhost/mcp")];
        assert!(validate(&config).is_ok());
    }
}
