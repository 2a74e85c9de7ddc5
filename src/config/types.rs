//! Configuration types

use serde::Deserialize;

use crate::tls::TlsClientConfig;

/// Root configuration structure
///
/// # Example
///
/// ```yaml
/// server:
///   listen_port: 55432
///
/// target:
///   host: "postgres.example.com"
///   port: 5432
///   tls:
///     required: true
///
/// credentials:
///   username: "svc"
///   password: "${SERVICE_PASSWORD}"
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Proxy listener configuration
    pub server: ServerConfig,

    /// Real database server to connect to
    pub target: TargetConfig,

    /// Service credentials presented to the real server
    pub credentials: CredentialsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.target.host.is_empty() {
            return Err("target.host must not be empty".to_string());
        }
        if self.credentials.username.is_empty() {
            return Err("credentials.username must not be empty".to_string());
        }
        Ok(())
    }
}

/// Proxy listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Port to listen on
    pub listen_port: u16,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds (0 = disabled)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Maximum number of concurrent connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Target database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Target database host
    pub host: String,
    /// Target database port
    pub port: u16,
    /// TLS configuration for the server-side link
    #[serde(default)]
    pub tls: TlsClientConfig,
}

impl TargetConfig {
    /// Hostname used for certificate checks: the configured override, or the
    /// target host itself
    pub fn server_name(&self) -> &str {
        self.tls.server_name.as_deref().unwrap_or(&self.host)
    }
}

/// Service credentials presented to the real server
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Username the proxy authenticates as
    pub username: String,
    /// Password for that username
    pub password: String,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_max_connections() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}
