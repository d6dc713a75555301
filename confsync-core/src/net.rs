//! Framed TCP transport
//!
//! Messages travel as bincode blobs behind a little-endian u32 length
//! prefix, capped well above the snapshot size limit. The listener runs
//! one task per client: a `Hello` handshake pins the peer's credentials,
//! then requests are dispatched to the service until the peer hangs up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec::MAX_SNAPSHOT_BYTES;
use crate::error::{ConfigError, ConfigResult};
use crate::protocol::{Request, Response};
use crate::service::ConfigService;

/// Frame cap: a compressed snapshot plus protocol overhead.
const MAX_FRAME_BYTES: u64 = MAX_SNAPSHOT_BYTES + 1024 * 1024;

/// Strip the URL scheme down to the host:port a socket understands.
pub fn host_port(url: &str) -> &str {
    url.trim()
        .strip_prefix("tcp://")
        .unwrap_or_else(|| url.trim())
}

/// One framed peer connection.
pub struct FramedConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    send_timeout: Duration,
    recv_timeout: Duration,
}

impl FramedConnection {
    pub fn new(stream: TcpStream) -> ConfigResult<Self> {
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer_addr,
            send_timeout: Duration::from_secs(30),
            recv_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeouts(mut self, send: Duration, recv: Duration) -> Self {
        self.send_timeout = send;
        self.recv_timeout = recv;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send one message as a length-prefixed frame.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> ConfigResult<()> {
        let bytes = bincode::serialize(message)
            .map_err(|e| ConfigError::Internal(format!("encode failed: {e}")))?;
        let length = bytes.len() as u32;

        let send_future = async {
            self.stream.write_all(&length.to_le_bytes()).await?;
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        timeout(self.send_timeout, send_future)
            .await
            .map_err(|_| ConfigError::Timeout)??;
        Ok(())
    }

    /// Receive one length-prefixed frame and decode it.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> ConfigResult<T> {
        let recv_future = async {
            let mut length_bytes = [0u8; 4];
            self.stream.read_exact(&mut length_bytes).await?;
            let length = u32::from_le_bytes(length_bytes) as u64;
            if length > MAX_FRAME_BYTES {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame too large: {length} bytes"),
                ));
            }
            let mut buffer = vec![0u8; length as usize];
            self.stream.read_exact(&mut buffer).await?;
            Ok::<Vec<u8>, std::io::Error>(buffer)
        };
        let buffer = timeout(self.recv_timeout, recv_future)
            .await
            .map_err(|_| ConfigError::Timeout)??;
        bincode::deserialize(&buffer)
            .map_err(|e| ConfigError::Internal(format!("decode failed: {e}")))
    }

    pub async fn close(mut self) -> ConfigResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// TCP listener front-ending one configuration service.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: &str) -> ConfigResult<Self> {
        let inner = TcpListener::bind(addr).await?;
        info!("configuration service listening on {}", inner.local_addr()?);
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> ConfigResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept loop; runs until the shutdown channel fires.
    pub async fn serve(self, service: Arc<ConfigService>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.inner.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!("new client connection from {addr}");
                            let service = Arc::clone(&service);
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(service, stream).await {
                                    warn!("client {addr} error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("failed to accept connection: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("listener shutting down");
                    break;
                }
            }
        }
    }
}

fn is_disconnect(error: &ConfigError) -> bool {
    matches!(
        error,
        ConfigError::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
        )
    )
}

async fn handle_client(service: Arc<ConfigService>, stream: TcpStream) -> ConfigResult<()> {
    let mut conn = FramedConnection::new(stream)?;

    // The first frame must be the handshake.
    let credentials = match conn.recv::<Request>().await {
        Ok(Request::Hello { credentials }) => {
            conn.send(&Response::HelloAck).await?;
            credentials
        }
        Ok(other) => {
            let response = Response::Error {
                kind: crate::protocol::ErrorKind::Internal,
                message: format!("expected Hello, got {}", other.message_type()),
            };
            conn.send(&response).await?;
            return Ok(());
        }
        Err(e) if is_disconnect(&e) => return Ok(()),
        Err(e) => return Err(e),
    };
    debug!(
        "client {} authenticated as {}",
        conn.peer_addr(),
        credentials.committer_id()
    );

    loop {
        match conn.recv::<Request>().await {
            Ok(request) => {
                debug!("handling {} from {}", request.message_type(), conn.peer_addr());
                let response = service.handle(&credentials, request);
                conn.send(&response).await?;
            }
            Err(e) if is_disconnect(&e) => {
                debug!("client {} disconnected", conn.peer_addr());
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
