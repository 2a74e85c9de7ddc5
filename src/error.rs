//! Error types for pgcred-proxy

use thiserror::Error;

use crate::tls::TlsError;

/// Main error type for the proxy
///
/// The three fatal handshake classes are kept distinguishable so callers can
/// tell a broken proxy ([`ProxyError::Protocol`]) apart from a rejected login
/// ([`ProxyError::Server`]) and from an encryption policy failure
/// ([`ProxyError::TlsRequired`]).
#[derive(Error, Debug)]
pub enum ProxyError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error - the peer sent something the state machine has no
    /// defined transition for
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the real server (e.g. the service login was rejected)
    #[error("Server error: {0}")]
    Server(String),

    /// Server declined encryption while policy makes it mandatory
    #[error("Server declined SSL but SSL is required")]
    TlsRequired,

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

/// Result type alias for ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}
