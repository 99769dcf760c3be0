//! Parsing helpers shared by the environment loader.

use std::str::FromStr;

use super::ConfigError;

/// Read an environment variable, treating blank values as unset.
pub(super) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse an environment variable, falling back to `default` when unset.
pub(super) fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional_env(name)?.unwrap_or(default))
}

/// Parse an optional environment variable.
pub(super) fn parse_optional_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|value| {
            value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                reason: format!("'{value}': {e}"),
            })
        })
        .transpose()
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub(super) fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}
