//! Server-side authentication
//!
//! The proxy impersonates the client while the real server runs its
//! authentication exchange: it answers the MD5 password challenge with the
//! configured *service* credentials — never with anything the client
//! presented — and forwards the final AuthenticationOk upstream before
//! stepping aside for transparent relay.
//!
//! The MD5 response format is
//! `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
//! Reference: <https://www.postgresql.org/docs/current/auth-password.html>

use md5::{Digest, Md5};
use zeroize::Zeroizing;

use crate::error::{ProxyError, Result};
use crate::protocol::constants::{AUTH_MD5_PASSWORD, AUTH_OK, MSG_AUTH_REQUEST, MSG_ERROR_RESPONSE, MSG_PASSWORD};
use crate::protocol::frames::TypedFrame;

// ============================================================================
// MD5 Password
// ============================================================================

/// Compute the MD5 password hash for PostgreSQL authentication.
///
/// # Arguments
///
/// * `user` - The database username
/// * `password` - The plaintext password
/// * `salt` - The 4-byte salt from the server
///
/// # Returns
///
/// A string in the format "md5XXXXXXXX..." (35 characters total)
pub fn compute_md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    // Stage 1: md5(password + user)
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let stage1_hex = hex_encode(&hasher.finalize());

    // Stage 2: md5(stage1_hex + salt)
    let mut hasher = Md5::new();
    hasher.update(stage1_hex.as_bytes());
    hasher.update(salt);

    format!("md5{}", hex_encode(&hasher.finalize()))
}

/// Encode bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Authentication Proxy
// ============================================================================

/// What the session driver must do with the server's frame
#[derive(Debug, PartialEq, Eq)]
pub enum AuthAction {
    /// Send this frame to the server; the exchange continues
    Respond(TypedFrame),
    /// Forward this frame to the client; authentication is complete and
    /// everything that follows is relayed without inspection
    ForwardAndFinish(TypedFrame),
}

/// State machine answering the server's authentication challenge with the
/// service credentials
pub struct AuthProxy {
    username: String,
    password: Zeroizing<String>,
    complete: bool,
}

impl AuthProxy {
    /// Create a proxy that authenticates as `username` with `password`
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
            complete: false,
        }
    }

    /// True once AuthenticationOk has been forwarded
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Process one typed frame from the server
    pub fn on_frame(&mut self, frame: TypedFrame) -> Result<AuthAction> {
        match frame.tag {
            MSG_ERROR_RESPONSE => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                error!("Server reported error during authentication: {}", text);
                Err(ProxyError::Server(text))
            }
            MSG_AUTH_REQUEST => self.on_auth_request(frame),
            other => Err(ProxyError::Protocol(format!(
                "Unhandled startup response type: '{}'",
                other as char
            ))),
        }
    }

    fn on_auth_request(&mut self, frame: TypedFrame) -> Result<AuthAction> {
        if frame.payload.len() < 4 {
            return Err(ProxyError::Protocol(
                "Authentication message too short".into(),
            ));
        }
        let sub_code = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]);
        match sub_code {
            AUTH_MD5_PASSWORD => {
                info!("MD5 authentication requested");
                if frame.payload.len() < 8 {
                    return Err(ProxyError::Protocol("MD5 auth message missing salt".into()));
                }
                let salt: [u8; 4] = [
                    frame.payload[4],
                    frame.payload[5],
                    frame.payload[6],
                    frame.payload[7],
                ];
                let digest = compute_md5_password(&self.username, &self.password, &salt);
                let mut payload = digest.into_bytes();
                payload.push(0);
                Ok(AuthAction::Respond(TypedFrame::new(MSG_PASSWORD, payload)))
            }
            AUTH_OK => {
                info!("Authentication successful");
                self.complete = true;
                Ok(AuthAction::ForwardAndFinish(frame))
            }
            other => Err(ProxyError::Protocol(format!(
                "Unhandled authentication type requested: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[]), "");
        assert_eq!(hex_encode(&[0x00]), "00");
        assert_eq!(hex_encode(&[0xff]), "ff");
        assert_eq!(hex_encode(&[0x12, 0x34, 0xab, 0xcd]), "1234abcd");
    }

    #[test]
    fn test_md5_password_format() {
        let hash = compute_md5_password("user", "password", &[0x01, 0x02, 0x03, 0x04]);
        assert!(hash.starts_with("md5"));
        assert_eq!(hash.len(), 35); // "md5" + 32 hex chars

        let hex_part = &hash[3..];
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex_part, hex_part.to_lowercase());
    }

    #[test]
    fn test_md5_password_known_value() {
        // Verifiable against PostgreSQL with:
        // SELECT 'md5' || md5(md5('password' || 'user') || E'\\x01020304');
        let hash = compute_md5_password("user", "password", &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(hash, "md5a3576f1ae039b8996bc4fc2720f9c71a");
    }

    #[test]
    fn test_md5_password_sensitivity() {
        let salt = [0x01, 0x02, 0x03, 0x04];
        let base = compute_md5_password("user", "pass", &salt);
        assert_ne!(base, compute_md5_password("user2", "pass", &salt));
        assert_ne!(base, compute_md5_password("user", "pass2", &salt));
        assert_ne!(
            base,
            compute_md5_password("user", "pass", &[0x01, 0x02, 0x03, 0x05])
        );
    }

    fn md5_challenge(salt: [u8; 4]) -> TypedFrame {
        let mut payload = AUTH_MD5_PASSWORD.to_be_bytes().to_vec();
        payload.extend_from_slice(&salt);
        TypedFrame::new(b'R', payload)
    }

    fn auth_ok() -> TypedFrame {
        TypedFrame::new(b'R', AUTH_OK.to_be_bytes().to_vec())
    }

    #[test]
    fn test_md5_challenge_answered_with_service_credentials() {
        let mut auth = AuthProxy::new("ir0nm4n", "p3pp3rp0tt5");
        let action = auth.on_frame(md5_challenge([0x01, 0x02, 0x03, 0x04])).unwrap();

        // Fixed vector for the two-stage MD5 algorithm, NUL-terminated
        let mut expected = b"md5ab76d9929a3ad35fb09bf0ba91926d96".to_vec();
        expected.push(0);
        assert_eq!(
            action,
            AuthAction::Respond(TypedFrame::new(b'p', expected))
        );
        assert!(!auth.is_complete());
    }

    #[test]
    fn test_auth_ok_forwarded_and_finishes() {
        let mut auth = AuthProxy::new("svc", "sekret");
        let frame = auth_ok();
        let action = auth.on_frame(frame.clone()).unwrap();
        assert_eq!(action, AuthAction::ForwardAndFinish(frame));
        assert!(auth.is_complete());
    }

    #[test]
    fn test_challenge_then_ok() {
        let mut auth = AuthProxy::new("svc", "sekret");
        let first = auth.on_frame(md5_challenge([0xde, 0xad, 0xbe, 0xef])).unwrap();
        assert!(matches!(first, AuthAction::Respond(_)));

        let second = auth.on_frame(auth_ok()).unwrap();
        assert!(matches!(second, AuthAction::ForwardAndFinish(_)));
    }

    #[test]
    fn test_server_error_surfaced_with_payload_text() {
        let mut auth = AuthProxy::new("svc", "sekret");
        let frame = TypedFrame::new(b'E', b"SFATAL\0Mpassword authentication failed\0\0".to_vec());
        match auth.on_frame(frame) {
            Err(ProxyError::Server(text)) => {
                assert!(text.contains("password authentication failed"));
            }
            other => panic!("expected Server error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unsupported_auth_method_is_fatal() {
        // Sub-code 10 is SASL; the proxy only speaks MD5
        let mut auth = AuthProxy::new("svc", "sekret");
        let frame = TypedFrame::new(b'R', 10u32.to_be_bytes().to_vec());
        assert!(matches!(
            auth.on_frame(frame),
            Err(ProxyError::Protocol(_))
        ));
    }

    #[test]
    fn test_unexpected_tag_is_fatal() {
        let mut auth = AuthProxy::new("svc", "sekret");
        let frame = TypedFrame::new(b'Z', vec![b'I']);
        assert!(matches!(
            auth.on_frame(frame),
            Err(ProxyError::Protocol(_))
        ));
    }

    #[test]
    fn test_truncated_auth_request_is_fatal() {
        let mut auth = AuthProxy::new("svc", "sekret");
        assert!(matches!(
            auth.on_frame(TypedFrame::new(b'R', vec![0, 0])),
            Err(ProxyError::Protocol(_))
        ));
        // MD5 request without the salt
        assert!(matches!(
            auth.on_frame(TypedFrame::new(b'R', AUTH_MD5_PASSWORD.to_be_bytes().to_vec())),
            Err(ProxyError::Protocol(_))
        ));
    }
}
