//! Configuration loader

use super::Config;
use crate::error::{ProxyError, Result};
use std::path::Path;

/// Load configuration from a YAML file
///
/// Also resolves `${VAR}` references and applies PGCRED_PROXY_* env var
/// overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    resolve_config_env_vars(&mut config);
    apply_env_overrides(&mut config);
    config.validate().map_err(ProxyError::Config)?;
    Ok(config)
}

/// Apply PGCRED_PROXY_* environment variable overrides to a config.
///
/// Any set env var overrides the corresponding config value:
/// - `PGCRED_PROXY_LISTEN_ADDRESS` / `PGCRED_PROXY_LISTEN_PORT`
/// - `PGCRED_PROXY_TARGET_HOST` / `PGCRED_PROXY_TARGET_PORT`
/// - `PGCRED_PROXY_USERNAME` / `PGCRED_PROXY_PASSWORD`
/// - `PGCRED_PROXY_REQUIRE_SSL` (true/false)
/// - `PGCRED_PROXY_LOG_LEVEL`
fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("PGCRED_PROXY_LISTEN_ADDRESS") {
        debug!("Overriding listen_address from PGCRED_PROXY_LISTEN_ADDRESS");
        config.server.listen_address = val;
    }
    if let Ok(val) = std::env::var("PGCRED_PROXY_LISTEN_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding listen_port from PGCRED_PROXY_LISTEN_PORT");
            config.server.listen_port = port;
        }
    }
    if let Ok(val) = std::env::var("PGCRED_PROXY_TARGET_HOST") {
        debug!("Overriding target host from PGCRED_PROXY_TARGET_HOST");
        config.target.host = val;
    }
    if let Ok(val) = std::env::var("PGCRED_PROXY_TARGET_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding target port from PGCRED_PROXY_TARGET_PORT");
            config.target.port = port;
        }
    }
    if let Ok(val) = std::env::var("PGCRED_PROXY_USERNAME") {
        debug!("Overriding service username from PGCRED_PROXY_USERNAME");
        config.credentials.username = val;
    }
    if let Ok(val) = std::env::var("PGCRED_PROXY_PASSWORD") {
        debug!("Overriding service password from PGCRED_PROXY_PASSWORD");
        config.credentials.password = val;
    }
    if let Ok(val) = std::env::var("PGCRED_PROXY_REQUIRE_SSL") {
        if let Ok(required) = val.parse::<bool>() {
            debug!("Overriding tls.required from PGCRED_PROXY_REQUIRE_SSL");
            config.target.tls.required = required;
        }
    }
    if let Ok(val) = std::env::var("PGCRED_PROXY_LOG_LEVEL") {
        debug!("Overriding log level from PGCRED_PROXY_LOG_LEVEL");
        config.logging.level = val;
    }
}

/// Resolve environment variables in a string value
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - curly brace syntax
/// - `$VAR_NAME` - simple syntax (for single variable values)
///
/// If the environment variable is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        return match std::env::var(var_name) {
            Ok(env_value) => env_value,
            Err(_) => value.to_string(),
        };
    }

    if value.starts_with('$') && !value.contains(' ') && value.len() > 1 {
        let var_name = &value[1..];
        return match std::env::var(var_name) {
            Ok(env_value) => env_value,
            Err(_) => value.to_string(),
        };
    }

    value.to_string()
}

/// Resolve environment variables in all config fields that support it
fn resolve_config_env_vars(config: &mut Config) {
    config.credentials.username = resolve_env_var(&config.credentials.username);
    config.credentials.password = resolve_env_var(&config.credentials.password);
    config.target.host = resolve_env_var(&config.target.host);
}
