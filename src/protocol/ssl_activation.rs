//! Server-side SSL activation
//!
//! Before anything else reaches the real server, the proxy must ask it for an
//! encrypted channel: the 8-byte SSL probe has to be the very first bytes on
//! the connection, and no application data may leak out in plaintext while
//! the answer is pending once encryption is agreed.
//!
//! [`SslActivation`] models this as an explicit state machine with an owned
//! negotiation buffer: the first intercepted write triggers the probe and
//! every write up to the server's one-byte verdict is queued, never
//! forwarded. The verdict either removes the handler (plaintext), installs
//! the TLS layer (encrypted), or kills the connection (error / policy
//! violation). Buffered writes are flushed in original order on the two
//! surviving paths and dropped with the machine on every other exit path.

use std::collections::VecDeque;

use crate::error::{ProxyError, Result};
use crate::protocol::constants::{SSL_ACCEPTED, SSL_DECLINED, SSL_ERROR, SSL_REQUEST_FRAME};

/// Lifecycle of the activation handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No write intercepted yet; the probe has not been sent
    Idle,
    /// Probe sent, verdict pending; writes are being queued
    Buffering,
    /// Server declined and policy allows plaintext; handler stepped aside
    Removed,
    /// Server accepted; the TLS layer has taken the handler's place
    TlsActive,
    /// Server declined while encryption is mandatory; connection is dead
    Closed,
    /// Protocol error during negotiation; connection is dead
    Failed,
}

/// What to do with an intercepted outbound write
#[derive(Debug, PartialEq, Eq)]
pub enum WriteAction {
    /// First write: send the 8-byte SSL probe now; the message was queued
    SendProbe([u8; 8]),
    /// Verdict still pending; the message was queued
    Buffered,
    /// Negotiation resolved; the message passes through unchanged
    PassThrough(Vec<u8>),
}

/// Outcome of the server's verdict
#[derive(Debug, PartialEq, Eq)]
pub enum SslVerdict {
    /// Continue in plaintext; flush these writes in order
    Plaintext(Vec<Vec<u8>>),
    /// Install the TLS layer, then flush these writes in order through it
    UpgradeTls(Vec<Vec<u8>>),
}

/// State machine driving the SSL upgrade toward the real server
pub struct SslActivation {
    require_ssl: bool,
    state: State,
    buffer: VecDeque<Vec<u8>>,
}

impl SslActivation {
    /// Create a driver; `require_ssl` makes a declined upgrade fatal
    pub fn new(require_ssl: bool) -> Self {
        Self {
            require_ssl,
            state: State::Idle,
            buffer: VecDeque::new(),
        }
    }

    /// Intercept an outbound write toward the server
    pub fn write(&mut self, msg: Vec<u8>) -> WriteAction {
        match self.state {
            State::Idle => {
                info!("Requesting SSL communication with server");
                self.buffer.push_back(msg);
                self.state = State::Buffering;
                WriteAction::SendProbe(SSL_REQUEST_FRAME)
            }
            State::Buffering => {
                debug!("Buffering write until SSL verdict ({} bytes)", msg.len());
                self.buffer.push_back(msg);
                WriteAction::Buffered
            }
            _ => WriteAction::PassThrough(msg),
        }
    }

    /// Apply the server's one-byte verdict on the probe
    pub fn on_server_reply(&mut self, reply: u8) -> Result<SslVerdict> {
        if self.state != State::Buffering {
            self.state = State::Failed;
            return Err(ProxyError::Protocol(
                "SSL verdict received before the probe was sent".into(),
            ));
        }
        match reply {
            SSL_ERROR => {
                self.state = State::Failed;
                Err(ProxyError::Protocol(
                    "Server answered SSL probe with an error".into(),
                ))
            }
            SSL_DECLINED => {
                if self.require_ssl {
                    info!("Server denied SSL but SSL is required");
                    self.state = State::Closed;
                    return Err(ProxyError::TlsRequired);
                }
                info!("Server denied SSL, continuing in plaintext");
                self.state = State::Removed;
                Ok(SslVerdict::Plaintext(self.drain()))
            }
            SSL_ACCEPTED => {
                info!("Server accepted SSL");
                self.state = State::TlsActive;
                Ok(SslVerdict::UpgradeTls(self.drain()))
            }
            other => {
                self.state = State::Failed;
                Err(ProxyError::Protocol(format!(
                    "Unhandled SSL probe response: 0x{:02X}",
                    other
                )))
            }
        }
    }

    /// True once the verdict arrived and the machine stepped aside
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, State::Removed | State::TlsActive)
    }

    fn drain(&mut self) -> Vec<Vec<u8>> {
        self.buffer.drain(..).collect()
    }
}
