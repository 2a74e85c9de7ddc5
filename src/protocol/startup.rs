//! Startup message codec
//!
//! The startup message is the first thing a client sends after SSL
//! negotiation: a 2-byte major and 2-byte minor protocol version followed by
//! NUL-terminated parameter strings (alternating key/value), terminated by a
//! lone NUL byte.
//!
//! Parameters are kept as an ordered flat token list rather than a map: the
//! proxy must re-serialize the message with all parameters other than `user`
//! in their original relative order.

use crate::error::{ProxyError, Result};

/// A parsed startup message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    /// Protocol major version
    pub major: u16,
    /// Protocol minor version
    pub minor: u16,
    /// Ordered parameter tokens, alternating key/value
    pub params: Vec<String>,
}

impl StartupMessage {
    /// Parse a startup message payload (without the outer length field)
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(ProxyError::Protocol(format!(
                "Startup message too short: {} bytes",
                payload.len()
            )));
        }

        let major = u16::from_be_bytes([payload[0], payload[1]]);
        let minor = u16::from_be_bytes([payload[2], payload[3]]);

        let mut params = Vec::new();
        let mut rest = &payload[4..];
        loop {
            let end = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| ProxyError::Protocol("Unterminated startup parameter".into()))?;
            if end == 0 {
                // A lone NUL with no preceding bytes terminates the list
                break;
            }
            let token = std::str::from_utf8(&rest[..end])
                .map_err(|_| ProxyError::Protocol("Invalid UTF-8 in startup parameter".into()))?;
            params.push(token.to_string());
            rest = &rest[end + 1..];
        }

        Ok(Self {
            major,
            minor,
            params,
        })
    }

    /// Serialize to a startup message payload (without the outer length field)
    pub fn serialize(&self) -> Vec<u8> {
        let params_len: usize = self.params.iter().map(|p| p.len() + 1).sum();
        let mut out = Vec::with_capacity(4 + params_len + 1);
        out.extend_from_slice(&self.major.to_be_bytes());
        out.extend_from_slice(&self.minor.to_be_bytes());
        for param in &self.params {
            out.extend_from_slice(param.as_bytes());
            out.push(0);
        }
        out.push(0);
        out
    }

    /// Replace the login identity: drop any existing `user`/value pair and
    /// append `user`/`username` at the end, preserving the relative order of
    /// all other parameters.
    pub fn with_user(&self, username: &str) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + 2);
        let mut tokens = self.params.iter();
        while let Some(token) = tokens.next() {
            if token == "user" {
                // Skip the key and its value
                tokens.next();
            } else {
                params.push(token.clone());
                if let Some(value) = tokens.next() {
                    params.push(value.clone());
                }
            }
        }
        params.push("user".to_string());
        params.push(username.to_string());

        Self {
            major: self.major,
            minor: self.minor,
            params,
        }
    }

    /// The current `user` parameter value, if present
    pub fn user(&self) -> Option<&str> {
        self.params
            .chunks_exact(2)
            .find(|pair| pair[0] == "user")
            .map(|pair| pair[1].as_str())
    }
}
