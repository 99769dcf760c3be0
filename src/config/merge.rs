//! Merging YAML overrides on top of the environment.

use std::path::PathBuf;

use super::yaml::YamlConfig;
use super::{ConfigError, ServerConfig, TlsConfig, env};

/// Environment (with defaults) as the base, YAML values on top.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let mut config = env::load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            config.tls = match (tls.enabled, tls.cert_path, tls.key_path) {
                (Some(false), _, _) => None,
                (_, Some(cert), Some(key)) => Some(TlsConfig {
                    cert_path: PathBuf::from(cert),
                    key_path: PathBuf::from(key),
                }),
                (Some(true), _, _) => Some(config.tls.take().ok_or_else(|| {
                    ConfigError::Validation(
                        "server.tls requires cert_path and key_path".to_string(),
                    )
                })?),
                (None, _, _) => config.tls.take(),
            };
        }
    }

    if let Some(model) = yaml.model {
        override_with(&mut config.ai_services_endpoint, model.endpoint);
        override_option(&mut config.ai_services_api_key, model.api_key);
        override_option(&mut config.ai_services_token, model.token);
        override_with(&mut config.voice_live_deployment, model.deployment);
        override_with(&mut config.voice_live_api_version, model.api_version);
        override_with(&mut config.voice, model.voice);
        override_with(&mut config.voice_type, model.voice_type);
        override_with(&mut config.vad_threshold, model.vad_threshold);
        override_with(&mut config.silence_duration_ms, model.silence_duration_ms);
        override_with(&mut config.noise_reduction, model.noise_reduction);
        override_with(&mut config.echo_cancellation, model.echo_cancellation);
        override_option(
            &mut config.input_transcription_model,
            model.input_transcription_model,
        );
        override_with(&mut config.reconnect_attempts, model.reconnect_attempts);
    }

    if let Some(acs) = yaml.acs {
        override_option(&mut config.acs_endpoint, acs.endpoint);
        override_option(&mut config.acs_access_key, acs.access_key);
        override_option(&mut config.callback_host_uri, acs.callback_host_uri);
        override_option(&mut config.transfer_target, acs.transfer_target);
    }

    if let Some(agent) = yaml.agent {
        override_with(&mut config.agent_name, agent.name);
        override_option(
            &mut config.agent_prompt_path,
            agent.prompt_path.map(PathBuf::from),
        );
    }

    if let Some(tools) = yaml.tools {
        override_with(&mut config.tool_connect_timeout_ms, tools.connect_timeout_ms);
        override_with(&mut config.record_invocations, tools.record_invocations);
        override_with(&mut config.mcp_servers, tools.mcp_servers);
    }

    if let Some(security) = yaml.security {
        override_option(&mut config.cors_allowed_origins, security.cors_allowed_origins);
        override_with(
            &mut config.rate_limit_requests_per_second,
            security.rate_limit_requests_per_second,
        );
        override_with(&mut config.rate_limit_burst_size, security.rate_limit_burst_size);
        override_option(
            &mut config.max_websocket_connections,
            security.max_websocket_connections,
        );
        override_with(&mut config.max_connections_per_ip, security.max_connections_per_ip);
    }

    Ok(config)
}

fn override_with<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn override_option<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}
