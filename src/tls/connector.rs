//! TLS connector for server-side connections
//!
//! `TlsConnector` establishes the TLS-encrypted channel to the database
//! server once it has accepted the SSL probe. It is invoked exclusively from
//! the SSL activation driver's accept branch.

use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::tls::{load_certificates, TlsClientConfig, TlsError, TlsVerifyMode};

/// TLS connector for establishing TLS connections to the database server
///
/// Wraps `tokio_rustls::TlsConnector` with trust-material loading and the
/// configured verification policy.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector from configuration
    ///
    /// Loads CA certificates from `ca_path` when given, falling back to the
    /// built-in webpki roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA file cannot be read or parsed, or the
    /// resulting TLS configuration is invalid.
    pub fn new(config: &TlsClientConfig) -> Result<Self, TlsError> {
        let root_store = build_root_store(config)?;
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?;

        let client_config = match config.verify_mode {
            TlsVerifyMode::Verify => builder
                .with_root_certificates(root_store)
                .with_no_client_auth(),
            TlsVerifyMode::VerifyCa => {
                let webpki =
                    WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider)
                        .build()
                        .map_err(|e| {
                            TlsError::config(format!("Failed to build verifier: {}", e))
                        })?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(SkipHostnameVerification {
                        inner: webpki,
                    }))
                    .with_no_client_auth()
            }
            TlsVerifyMode::None => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification {
                    provider,
                }))
                .with_no_client_auth(),
        };

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Connect to a server over TLS
    ///
    /// Performs the TLS handshake. The `server_name` is used for SNI and
    /// certificate verification.
    pub async fn connect(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> Result<TlsStream<TcpStream>, TlsError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::config(format!("Invalid server name: {}", server_name)))?;

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::handshake(e.to_string()))
    }
}

/// Build the root certificate store based on configuration
fn build_root_store(config: &TlsClientConfig) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();

    if let Some(ca_path) = &config.ca_path {
        let certs = load_certificates(ca_path)?;
        if certs.is_empty() {
            return Err(TlsError::cert_load(ca_path, "no certificates found in file"));
        }
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| TlsError::cert_load(ca_path, e.to_string()))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(root_store)
}

/// Verifier that checks the certificate chain but tolerates a hostname
/// mismatch (`verify_mode: verify_ca`)
#[derive(Debug)]
struct SkipHostnameVerification {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for SkipHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(e))
                if matches!(
                    e,
                    CertificateError::NotValidForName
                        | CertificateError::NotValidForNameContext { .. }
                ) =>
            {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Verifier that accepts any certificate (`verify_mode: none`)
///
/// **WARNING**: Insecure; development and testing only.
#[derive(Debug)]
struct NoCertificateVerification {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
