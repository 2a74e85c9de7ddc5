//! pgcred-proxy - Transparent PostgreSQL proxy with credential substitution
//!
//! This library provides the core functionality for a proxy that:
//! - Lets clients authenticate with any identity
//! - Rewrites the startup message to carry a configured service username
//! - Answers the server's authentication challenge with the service password
//! - Decides on its own whether the server-side link is encrypted
//! - Relays all traffic transparently after authentication

#[macro_use]
mod logging;

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tls;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use server::{Listener, NetworkStream};
pub use tls::{TlsClientConfig, TlsConnector, TlsError, TlsVerifyMode};
