//! TLS configuration types

use serde::Deserialize;
use std::path::PathBuf;

/// TLS configuration for connecting to the database server
///
/// The proxy always probes the server for SSL; this configuration controls
/// what happens with the answer and how the server certificate is checked.
///
/// # Example YAML
/// ```yaml
/// target:
///   host: "db.example.com"
///   port: 5432
///   tls:
///     required: true
///     verify_mode: "verify"
///     ca_path: "/path/to/ca-bundle.crt"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsClientConfig {
    /// Whether server-side encryption is mandatory
    ///
    /// When `true`, a server that declines the SSL upgrade kills the
    /// connection before any data is forwarded. When `false` (default),
    /// the session continues in plaintext.
    #[serde(default)]
    pub required: bool,

    /// Certificate verification mode
    #[serde(default)]
    pub verify_mode: TlsVerifyMode,

    /// Path to CA certificate bundle in PEM format
    ///
    /// Used to verify the database server's certificate.
    /// If not specified, uses the built-in webpki roots.
    pub ca_path: Option<PathBuf>,

    /// Expected server hostname for certificate checks
    ///
    /// Defaults to the target host. Set this when connecting via an address
    /// that differs from the name in the server's certificate.
    pub server_name: Option<String>,
}

/// Certificate verification mode
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerifyMode {
    /// Full verification: CA chain + hostname match (default)
    #[default]
    Verify,

    /// Verify CA chain only, skip the hostname check
    ///
    /// Useful when connecting via IP address or a port-forward while the
    /// certificate carries the server's DNS name.
    #[serde(rename = "verify_ca")]
    VerifyCa,

    /// No verification (INSECURE - development only!)
    ///
    /// Any certificate is accepted, including self-signed and expired.
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_client_config_defaults() {
        let config: TlsClientConfig = serde_yaml::from_str("{}").unwrap();
        assert!(!config.required);
        assert_eq!(config.verify_mode, TlsVerifyMode::Verify);
        assert!(config.ca_path.is_none());
        assert!(config.server_name.is_none());
    }

    #[test]
    fn test_tls_client_config_full() {
        let yaml = r#"
            required: true
            verify_mode: verify_ca
            ca_path: /path/to/ca.pem
            server_name: db.internal
        "#;
        let config: TlsClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.required);
        assert_eq!(config.verify_mode, TlsVerifyMode::VerifyCa);
        assert_eq!(config.ca_path.unwrap(), PathBuf::from("/path/to/ca.pem"));
        assert_eq!(config.server_name.unwrap(), "db.internal");
    }

    #[test]
    fn test_tls_verify_mode_parsing() {
        let verify: TlsVerifyMode = serde_yaml::from_str("verify").unwrap();
        assert_eq!(verify, TlsVerifyMode::Verify);

        let verify_ca: TlsVerifyMode = serde_yaml::from_str("verify_ca").unwrap();
        assert_eq!(verify_ca, TlsVerifyMode::VerifyCa);

        let none: TlsVerifyMode = serde_yaml::from_str("none").unwrap();
        assert_eq!(none, TlsVerifyMode::None);
    }
}
