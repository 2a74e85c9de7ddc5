//! End-to-end tests for the PostgreSQL credential proxy
//!
//! These tests run the full proxy against an in-process mock PostgreSQL
//! server speaking the wire protocol, so they need no external database:
//! the mock drives the SSL probe verdict and the authentication exchange
//! and records everything the proxy sends it.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use pgcred_proxy::config::{load_config_from_str, Config};
use pgcred_proxy::Listener;

/// Default test timeout
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The 8-byte SSL probe the proxy must send first
const SSL_PROBE: [u8; 8] = [0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F];

/// MD5 response for user `ir0nm4n`, password `p3pp3rp0tt5`, salt 01 02 03 04
const MD5_RESPONSE: &[u8] = b"md5ab76d9929a3ad35fb09bf0ba91926d96\0";

// ============================================================================
// Wire Helpers
// ============================================================================

async fn write_untyped(stream: &mut TcpStream, payload: &[u8]) {
    let mut out = ((payload.len() + 4) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(payload);
    stream.write_all(&out).await.unwrap();
}

async fn read_untyped(stream: &mut TcpStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let len = u32::from_be_bytes(len) as usize;
    let mut payload = vec![0u8; len - 4];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

fn typed(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

async fn read_typed(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.unwrap();
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len - 4];
    stream.read_exact(&mut payload).await.unwrap();
    (header[0], payload)
}

fn startup_payload(params: &[&str]) -> Vec<u8> {
    let mut out = vec![0, 3, 0, 0]; // protocol version 3.0
    for param in params {
        out.extend_from_slice(param.as_bytes());
        out.push(0);
    }
    out.push(0);
    out
}

fn parse_params(payload: &[u8]) -> Vec<String> {
    let mut params = Vec::new();
    let mut rest = &payload[4..];
    loop {
        let end = rest.iter().position(|&b| b == 0).unwrap();
        if end == 0 {
            break;
        }
        params.push(String::from_utf8(rest[..end].to_vec()).unwrap());
        rest = &rest[end + 1..];
    }
    params
}

// ============================================================================
// Harness
// ============================================================================

fn proxy_config(target_port: u16, require_ssl: bool) -> Arc<Config> {
    let yaml = format!(
        r#"
server:
  listen_address: "127.0.0.1"
  listen_port: 0
  connect_timeout_secs: 5
  idle_timeout_secs: 5

target:
  host: "127.0.0.1"
  port: {}
  tls:
    required: {}

credentials:
  username: "ir0nm4n"
  password: "p3pp3rp0tt5"
"#,
        target_port, require_ssl
    );
    Arc::new(load_config_from_str(&yaml).unwrap())
}

/// Start the proxy on an OS-assigned port; returns its address
async fn start_proxy(
    config: Arc<Config>,
) -> (
    std::net::SocketAddr,
    broadcast::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let listener = Listener::bind(config, shutdown_rx).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = listener.run().await;
    });
    (addr, shutdown_tx, handle)
}

macro_rules! with_timeout {
    ($body:expr) => {
        match timeout(TEST_TIMEOUT, async { $body }).await {
            Ok(result) => result,
            Err(_) => panic!("Test timed out after {:?}", TEST_TIMEOUT),
        }
    };
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_plaintext_md5() {
    with_timeout!({
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = server_listener.local_addr().unwrap().port();

        // Mock server: decline SSL, demand MD5, validate the response,
        // then relay canned bytes
        let server = tokio::spawn(async move {
            let (mut conn, _) = server_listener.accept().await.unwrap();

            // The probe must be the very first bytes on the wire
            let mut probe = [0u8; 8];
            conn.read_exact(&mut probe).await.unwrap();
            assert_eq!(probe, SSL_PROBE);
            conn.write_all(b"N").await.unwrap();

            // The startup must carry the service username
            let startup = read_untyped(&mut conn).await;
            let params = parse_params(&startup);

            // MD5 challenge with a fixed salt
            let mut challenge = 5u32.to_be_bytes().to_vec();
            challenge.extend_from_slice(&[1, 2, 3, 4]);
            conn.write_all(&typed(b'R', &challenge)).await.unwrap();

            let (tag, response) = read_typed(&mut conn).await;
            assert_eq!(tag, b'p');
            assert_eq!(response, MD5_RESPONSE);

            // Auth ok + session setup, all in one write so the proxy has to
            // forward the trailing frames it decoded behind AuthenticationOk
            let mut ready = typed(b'R', &0u32.to_be_bytes());
            ready.extend_from_slice(&typed(b'S', b"server_version\x0015.2\x00"));
            ready.extend_from_slice(&typed(b'Z', b"I"));
            conn.write_all(&ready).await.unwrap();

            // Transparent relay: echo a canned reply to whatever arrives
            let mut query = vec![0u8; 14];
            conn.read_exact(&mut query).await.unwrap();
            conn.write_all(&typed(b'C', b"SELECT 1\0")).await.unwrap();

            (params, query)
        });

        let (proxy_addr, shutdown_tx, proxy_handle) =
            start_proxy(proxy_config(server_port, false)).await;

        // Mock client: probe for SSL, get refused, log in as alice
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&SSL_PROBE).await.unwrap();
        let mut verdict = [0u8; 1];
        client.read_exact(&mut verdict).await.unwrap();
        assert_eq!(verdict[0], b'N');

        write_untyped(
            &mut client,
            &startup_payload(&["user", "alice", "database", "testdb"]),
        )
        .await;

        // The client never sees the MD5 challenge; the first thing it gets
        // back is AuthenticationOk
        let (tag, payload) = read_typed(&mut client).await;
        assert_eq!(tag, b'R');
        assert_eq!(payload, 0u32.to_be_bytes());

        let (tag, payload) = read_typed(&mut client).await;
        assert_eq!(tag, b'S');
        assert_eq!(payload, b"server_version\x0015.2\x00");

        let (tag, payload) = read_typed(&mut client).await;
        assert_eq!(tag, b'Z');
        assert_eq!(payload, b"I");

        // From here on, bytes pass through untouched in both directions
        let query = typed(b'Q', b"SELECT 1\0");
        assert_eq!(query.len(), 14);
        client.write_all(&query).await.unwrap();

        let (tag, payload) = read_typed(&mut client).await;
        assert_eq!(tag, b'C');
        assert_eq!(payload, b"SELECT 1\0");

        let (params, relayed_query) = server.await.unwrap();

        // The server saw the service identity, not alice, with the other
        // parameters in their original order
        assert_eq!(params, vec!["database", "testdb", "user", "ir0nm4n"]);
        assert_eq!(params.iter().filter(|p| *p == "user").count(), 1);

        // And the query reached it byte for byte
        assert_eq!(relayed_query, query);

        let _ = shutdown_tx.send(());
        let _ = proxy_handle.await;
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_without_ssl_probe() {
    with_timeout!({
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = server_listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut conn, _) = server_listener.accept().await.unwrap();

            // The proxy probes even when the client did not
            let mut probe = [0u8; 8];
            conn.read_exact(&mut probe).await.unwrap();
            assert_eq!(probe, SSL_PROBE);
            conn.write_all(b"N").await.unwrap();

            let startup = read_untyped(&mut conn).await;
            let params = parse_params(&startup);

            conn.write_all(&typed(b'R', &0u32.to_be_bytes()))
                .await
                .unwrap();
            params
        });

        let (proxy_addr, shutdown_tx, proxy_handle) =
            start_proxy(proxy_config(server_port, false)).await;

        // Straight to startup, no SSL negotiation
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        write_untyped(&mut client, &startup_payload(&["user", "alice"])).await;

        let (tag, payload) = read_typed(&mut client).await;
        assert_eq!(tag, b'R');
        assert_eq!(payload, 0u32.to_be_bytes());

        let params = server.await.unwrap();
        assert_eq!(params, vec!["user", "ir0nm4n"]);

        let _ = shutdown_tx.send(());
        let _ = proxy_handle.await;
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_required_ssl_declined_closes_without_leaking() {
    with_timeout!({
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = server_listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut conn, _) = server_listener.accept().await.unwrap();

            let mut probe = [0u8; 8];
            conn.read_exact(&mut probe).await.unwrap();
            assert_eq!(probe, SSL_PROBE);
            conn.write_all(b"N").await.unwrap();

            // Policy violation: the proxy must close without sending the
            // buffered startup (or anything else)
            let mut rest = Vec::new();
            conn.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let (proxy_addr, shutdown_tx, proxy_handle) =
            start_proxy(proxy_config(server_port, true)).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        write_untyped(&mut client, &startup_payload(&["user", "alice"])).await;

        // The client gets nothing back; the connection just dies
        let mut out = Vec::new();
        let n = client.read_to_end(&mut out).await.unwrap();
        assert_eq!(n, 0);

        let leaked = server.await.unwrap();
        assert!(leaked.is_empty(), "plaintext bytes leaked: {:?}", leaked);

        let _ = shutdown_tx.send(());
        let _ = proxy_handle.await;
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_error_during_auth_reaches_client() {
    with_timeout!({
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = server_listener.local_addr().unwrap().port();

        let error_payload: &[u8] = b"SFATAL\0C28P01\0Mpassword authentication failed\0\0";

        let server = tokio::spawn(async move {
            let (mut conn, _) = server_listener.accept().await.unwrap();

            let mut probe = [0u8; 8];
            conn.read_exact(&mut probe).await.unwrap();
            conn.write_all(b"N").await.unwrap();

            let _startup = read_untyped(&mut conn).await;

            // Reject the login outright
            conn.write_all(&typed(b'E', error_payload)).await.unwrap();
        });

        let (proxy_addr, shutdown_tx, proxy_handle) =
            start_proxy(proxy_config(server_port, false)).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        write_untyped(&mut client, &startup_payload(&["user", "alice"])).await;

        // The server's error is forwarded so the client can see why
        let (tag, payload) = read_typed(&mut client).await;
        assert_eq!(tag, b'E');
        assert_eq!(payload, error_payload);

        // Then the connection closes
        let mut out = Vec::new();
        let n = client.read_to_end(&mut out).await.unwrap();
        assert_eq!(n, 0);

        server.await.unwrap();
        let _ = shutdown_tx.send(());
        let _ = proxy_handle.await;
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_startup_without_user_gains_service_user() {
    with_timeout!({
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = server_listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut conn, _) = server_listener.accept().await.unwrap();

            let mut probe = [0u8; 8];
            conn.read_exact(&mut probe).await.unwrap();
            conn.write_all(b"N").await.unwrap();

            let startup = read_untyped(&mut conn).await;
            let params = parse_params(&startup);

            conn.write_all(&typed(b'R', &0u32.to_be_bytes()))
                .await
                .unwrap();
            params
        });

        let (proxy_addr, shutdown_tx, proxy_handle) =
            start_proxy(proxy_config(server_port, false)).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        write_untyped(&mut client, &startup_payload(&["database", "testdb"])).await;

        let (tag, _) = read_typed(&mut client).await;
        assert_eq!(tag, b'R');

        let params = server.await.unwrap();
        assert_eq!(params, vec!["database", "testdb", "user", "ir0nm4n"]);

        let _ = shutdown_tx.send(());
        let _ = proxy_handle.await;
    });
}
