//! PostgreSQL wire protocol engine
//!
//! This module contains everything the proxy needs to understand about the
//! PostgreSQL wire protocol: incremental frame reassembly, the startup
//! message codec, and the handshake state machines for both connection
//! directions. Only the startup/authentication phase is ever parsed; once
//! authentication succeeds the proxy relays bytes untouched.
//!
//! Reference: <https://www.postgresql.org/docs/current/protocol-message-formats.html>

pub mod auth;
pub mod constants;
pub mod frames;
pub mod ssl_activation;
pub mod startup;
pub mod upstream;

pub use auth::{compute_md5_password, AuthAction, AuthProxy};
pub use frames::{FrameDecoder, TypedFormat, TypedFrame, UntypedFormat, UntypedFrame};
pub use ssl_activation::{SslActivation, SslVerdict};
pub use startup::StartupMessage;
pub use upstream::{UpstreamAction, UpstreamNegotiator};
