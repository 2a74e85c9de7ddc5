//! Per-connection session driver
//!
//! One session per accepted client connection. The session drives the
//! handshake phases in order and then degrades into a transparent relay:
//!
//! 1. Upstream negotiation: refuse the client's SSL probe, rewrite the
//!    startup message to the service username.
//! 2. Downstream connect + SSL activation: the probe is the first thing the
//!    server ever sees; the rewritten startup stays buffered until the
//!    verdict arrives and is then flushed in plaintext or through TLS.
//! 3. Authentication: answer the server's MD5 challenge with the service
//!    credentials, forward AuthenticationOk to the client.
//! 4. Relay: bidirectional byte copy, no inspection.
//!
//! Frames decoded but not consumed at a phase boundary, and undecoded
//! remainder bytes, are forwarded verbatim so the hand-off never drops or
//! duplicates data.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::protocol::constants::MSG_ERROR_RESPONSE;
use crate::protocol::frames::{FrameDecoder, TypedFormat, UntypedFormat};
use crate::protocol::ssl_activation::{SslActivation, SslVerdict, WriteAction};
use crate::protocol::upstream::{UpstreamAction, UpstreamNegotiator};
use crate::protocol::{AuthAction, AuthProxy};
use crate::server::stream::NetworkStream;
use crate::tls::TlsConnector;

/// A proxied client connection
pub struct Session {
    client: TcpStream,
    client_addr: SocketAddr,
    config: Arc<Config>,
}

impl Session {
    /// Create a session for an accepted client connection
    pub fn new(client: TcpStream, client_addr: SocketAddr, config: Arc<Config>) -> Self {
        Self {
            client,
            client_addr,
            config,
        }
    }

    /// Run the session to completion
    pub async fn handle(mut self) -> Result<()> {
        let connect_timeout = Duration::from_secs(self.config.server.connect_timeout_secs);

        // Phase 1: client-facing negotiation
        let (startup, client_leftover) = self.negotiate_with_client(connect_timeout).await?;
        info!(
            "Client {} forwarded as service user '{}'",
            self.client_addr, self.config.credentials.username
        );

        // Phase 2: connect to the real server
        let server_tcp = self.connect_to_server(connect_timeout).await?;

        // Phase 3: SSL activation; the rewritten startup is the first
        // intercepted write, so it rides the negotiation buffer
        let mut server = self
            .activate_server_ssl(server_tcp, startup, connect_timeout)
            .await?;

        // Phase 4: authenticate with the service credentials
        self.authenticate_with_server(&mut server, connect_timeout)
            .await?;

        // Any client bytes that arrived behind the startup message
        if !client_leftover.is_empty() {
            server.write_all(&client_leftover).await?;
            server.flush().await?;
        }

        debug!(
            "Handshake complete for {} -> {}:{}",
            self.client_addr, self.config.target.host, self.config.target.port
        );

        // Phase 5: transparent relay
        let idle_timeout = Duration::from_secs(self.config.server.idle_timeout_secs);
        relay(self.client, server, idle_timeout).await
    }

    /// Drive the upstream state machine until the startup message has been
    /// rewritten. Returns the rewritten startup frame bytes plus any client
    /// bytes that arrived behind it.
    async fn negotiate_with_client(
        &mut self,
        timeout_duration: Duration,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut negotiator = UpstreamNegotiator::new(&self.config.credentials.username);
        let mut decoder = FrameDecoder::<UntypedFormat>::new();
        let mut buf = vec![0u8; 8192];
        let mut startup: Option<Vec<u8>> = None;
        let mut leftover: Vec<u8> = Vec::new();

        loop {
            let n = timeout(timeout_duration, self.client.read(&mut buf))
                .await
                .map_err(|_| ProxyError::Timeout("Waiting for client startup".into()))??;
            if n == 0 {
                return Err(ProxyError::Connection(
                    "Client closed connection before startup".into(),
                ));
            }

            for frame in decoder.feed(&buf[..n])? {
                match negotiator.on_frame(frame)? {
                    UpstreamAction::RejectSsl => {
                        self.client.write_all(b"N").await?;
                        self.client.flush().await?;
                    }
                    UpstreamAction::Forward(bytes) => {
                        if startup.is_none() {
                            startup = Some(bytes);
                        } else {
                            leftover.extend_from_slice(&bytes);
                        }
                    }
                }
            }

            if let Some(startup) = startup.take() {
                leftover.extend(decoder.into_remainder());
                return Ok((startup, leftover));
            }
        }
    }

    /// Open the TCP connection to the real server
    async fn connect_to_server(&self, timeout_duration: Duration) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.config.target.host, self.config.target.port);
        debug!("Connecting to PostgreSQL server at {}", addr);

        let stream = timeout(timeout_duration, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::Timeout(format!("Connecting to {}", addr)))?
            .map_err(|e| ProxyError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

        Ok(stream)
    }

    /// Run the SSL activation handshake toward the server. The probe goes
    /// out as the very first bytes; buffered writes are flushed in order
    /// once the verdict is in, through TLS when the server accepted.
    async fn activate_server_ssl(
        &self,
        mut server_tcp: TcpStream,
        startup: Vec<u8>,
        timeout_duration: Duration,
    ) -> Result<NetworkStream> {
        let mut ssl = SslActivation::new(self.config.target.tls.required);

        let probe = match ssl.write(startup) {
            WriteAction::SendProbe(probe) => probe,
            _ => {
                return Err(ProxyError::Protocol(
                    "SSL activation already resolved before first write".into(),
                ))
            }
        };
        server_tcp.write_all(&probe).await?;
        server_tcp.flush().await?;

        let mut reply = [0u8; 1];
        timeout(timeout_duration, server_tcp.read_exact(&mut reply))
            .await
            .map_err(|_| ProxyError::Timeout("Waiting for SSL verdict".into()))??;

        let mut server = match ssl.on_server_reply(reply[0])? {
            SslVerdict::Plaintext(writes) => {
                let mut server = NetworkStream::Tcp(server_tcp);
                flush_buffered(&mut server, writes).await?;
                server
            }
            SslVerdict::UpgradeTls(writes) => {
                let connector = TlsConnector::new(&self.config.target.tls)?;
                let tls = connector
                    .connect(server_tcp, self.config.target.server_name())
                    .await?;
                let mut server = NetworkStream::Tls(Box::new(tls));
                if let Some(version) = server.tls_version() {
                    debug!("Server connection upgraded to {}", version);
                }
                flush_buffered(&mut server, writes).await?;
                server
            }
        };
        server.flush().await?;
        Ok(server)
    }

    /// Answer the server's authentication exchange, then forward the
    /// AuthenticationOk (and anything the server sent behind it) upstream.
    async fn authenticate_with_server(
        &mut self,
        server: &mut NetworkStream,
        timeout_duration: Duration,
    ) -> Result<()> {
        let mut auth = AuthProxy::new(
            &self.config.credentials.username,
            &self.config.credentials.password,
        );
        let mut decoder = FrameDecoder::<TypedFormat>::new();
        let mut buf = vec![0u8; 8192];
        let mut to_client: Vec<u8> = Vec::new();

        while !auth.is_complete() {
            let n = timeout(timeout_duration, server.read(&mut buf))
                .await
                .map_err(|_| ProxyError::Timeout("Waiting for server authentication".into()))??;
            if n == 0 {
                return Err(ProxyError::Connection(
                    "Server closed connection during authentication".into(),
                ));
            }

            for frame in decoder.feed(&buf[..n])? {
                if auth.is_complete() {
                    // Arrived behind AuthenticationOk in the same read
                    to_client.extend_from_slice(&frame.to_bytes());
                    continue;
                }
                // Keep the server's error visible to the client
                let error_frame =
                    (frame.tag == MSG_ERROR_RESPONSE).then(|| frame.to_bytes());
                match auth.on_frame(frame) {
                    Ok(AuthAction::Respond(response)) => {
                        server.write_all(&response.to_bytes()).await?;
                        server.flush().await?;
                    }
                    Ok(AuthAction::ForwardAndFinish(auth_ok)) => {
                        to_client.extend_from_slice(&auth_ok.to_bytes());
                    }
                    Err(e) => {
                        if let Some(bytes) = error_frame {
                            let _ = self.client.write_all(&bytes).await;
                            let _ = self.client.flush().await;
                        }
                        return Err(e);
                    }
                }
            }
        }

        to_client.extend(decoder.into_remainder());
        self.client.write_all(&to_client).await?;
        self.client.flush().await?;
        Ok(())
    }
}

/// Flush the negotiation buffer in its original order
async fn flush_buffered(server: &mut NetworkStream, writes: Vec<Vec<u8>>) -> Result<()> {
    for msg in writes {
        server.write_all(&msg).await?;
    }
    server.flush().await?;
    Ok(())
}

/// Run the bidirectional relay until either side closes
async fn relay(client: TcpStream, server: NetworkStream, idle_timeout: Duration) -> Result<()> {
    debug!("Starting relay with idle_timeout={:?}", idle_timeout);
    let (client_read, client_write) = split(client);
    let (server_read, server_write) = split(server);

    let client_to_server = tokio::spawn(copy_with_logging(
        client_read,
        server_write,
        "client->server",
        idle_timeout,
    ));
    let server_to_client = tokio::spawn(copy_with_logging(
        server_read,
        client_write,
        "server->client",
        idle_timeout,
    ));

    // Either direction finishing ends the session
    tokio::select! {
        result = client_to_server => {
            debug!("Client to server copy finished: {:?}", result);
        }
        result = server_to_client => {
            debug!("Server to client copy finished: {:?}", result);
        }
    }

    debug!("Relay session ended");
    Ok(())
}

/// Copy data from reader to writer with logging and optional idle timeout
async fn copy_with_logging<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    idle_timeout: Duration,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut total_bytes = 0u64;

    loop {
        let n = if idle_timeout.is_zero() {
            reader.read(&mut buf).await?
        } else {
            match timeout(idle_timeout, reader.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(
                        "{}: Idle timeout ({:?}) after {} bytes",
                        direction, idle_timeout, total_bytes
                    );
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("Idle timeout after {:?}", idle_timeout),
                    ));
                }
            }
        };

        if n == 0 {
            debug!("{}: EOF after {} bytes", direction, total_bytes);
            break;
        }

        trace!("{}: {} bytes", direction, n);
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total_bytes += n as u64;
    }

    let _ = writer.shutdown().await;

    Ok(total_bytes)
}
