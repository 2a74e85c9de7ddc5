//! Client-facing handshake states
//!
//! Two cooperating duties on the upstream (client-facing) side of the
//! connection, folded into one closed state machine:
//!
//! 1. Intercept the client's SSL probe and refuse it locally with `'N'`,
//!    without ever involving the real server. Transport security toward the
//!    server is negotiated independently by the proxy.
//! 2. Rewrite the startup message so the login identity is the configured
//!    service username, then step aside for transparent relay.
//!
//! Each frame is handled by exactly one state; handling returns the next
//! state implicitly by mutating `self.state`. A 4-byte payload that is not
//! the SSL magic (e.g. a cancel request) is forwarded into startup parsing
//! unchanged; widening the pre-auth dispatch is deliberately out of scope.

use crate::error::Result;
use crate::protocol::constants::{
    SSL_REQUEST_MAJOR, SSL_REQUEST_MINOR, SSL_REQUEST_PAYLOAD_LEN,
};
use crate::protocol::frames::UntypedFrame;
use crate::protocol::startup::StartupMessage;

/// What the session driver must do with the client's frame
#[derive(Debug, PartialEq, Eq)]
pub enum UpstreamAction {
    /// Answer the client's SSL probe with a single `'N'` byte; the frame is
    /// consumed and nothing goes to the server
    RejectSsl,
    /// Forward these bytes toward the server
    Forward(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpstreamState {
    /// Waiting for the SSL probe or the startup message
    AwaitingStartup,
    /// Startup rewritten; everything else passes through untouched
    Relaying,
}

/// State machine for the client-facing half of the handshake
pub struct UpstreamNegotiator {
    username: String,
    state: UpstreamState,
}

impl UpstreamNegotiator {
    /// Create a negotiator that rewrites the login identity to `username`
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            state: UpstreamState::AwaitingStartup,
        }
    }

    /// True once the startup message has been rewritten and forwarded
    pub fn is_relaying(&self) -> bool {
        self.state == UpstreamState::Relaying
    }

    /// Process one untyped frame from the client
    pub fn on_frame(&mut self, frame: UntypedFrame) -> Result<UpstreamAction> {
        match self.state {
            UpstreamState::AwaitingStartup => {
                if is_ssl_request(&frame.payload) {
                    debug!("Rejecting client's SSL request");
                    return Ok(UpstreamAction::RejectSsl);
                }
                let startup = StartupMessage::parse(&frame.payload)?;
                debug!(
                    "Rewriting startup user {:?} -> {:?}",
                    startup.user(),
                    self.username
                );
                let rewritten = startup.with_user(&self.username);
                self.state = UpstreamState::Relaying;
                Ok(UpstreamAction::Forward(
                    UntypedFrame::new(rewritten.serialize()).to_bytes(),
                ))
            }
            UpstreamState::Relaying => Ok(UpstreamAction::Forward(frame.to_bytes())),
        }
    }
}

fn is_ssl_request(payload: &[u8]) -> bool {
    if payload.len() != SSL_REQUEST_PAYLOAD_LEN {
        return false;
    }
    let major = u16::from_be_bytes([payload[0], payload[1]]);
    let minor = u16::from_be_bytes([payload[2], payload[3]]);
    major == SSL_REQUEST_MAJOR && minor == SSL_REQUEST_MINOR
}
