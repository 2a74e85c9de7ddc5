//! TLS/SSL support for pgcred-proxy
//!
//! Only the client side exists here: the proxy may encrypt its connection
//! *to the database server*, driven by the SSL activation handshake in
//! [`crate::protocol::ssl_activation`]. Connections *from* database clients
//! are never upgraded — the protocol layer answers their SSL probe with `'N'`.
//!
//! ```text
//! ┌──────────┐      plaintext     ┌───────────┐     TLS (optional)  ┌──────────┐
//! │  Client  │ ────────────────── │   Proxy   │ ─────────────────── │ Postgres │
//! └──────────┘                    └───────────┘                     └──────────┘
//! ```
//!
//! # Security
//!
//! - Uses rustls (pure Rust TLS implementation)
//! - Certificate verification enabled by default; hostname checking can be
//!   relaxed (`verify_ca`) or verification disabled entirely (`none`) for
//!   development setups

mod config;
mod connector;
mod error;

pub use config::{TlsClientConfig, TlsVerifyMode};
pub use connector::TlsConnector;
pub use error::TlsError;

use rustls::pki_types::CertificateDer;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load certificates from a PEM file
///
/// Reads all certificates from a PEM-encoded file. Supports certificate
/// chains.
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    Ok(certs)
}
