//! Client channel to a configuration service
//!
//! `ConfigChannel` is the seam between everything that talks to a peer
//! (edit sessions, the refresher, the CLI) and the transport: one method
//! per RPC, implemented over a single `call`. `TcpChannel` opens a fresh
//! connection per call, handshakes, performs the request and hangs up;
//! retry and backoff are deliberately the caller's business.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::net::{host_port, FramedConnection};
use crate::protocol::{Credentials, HistoryEntry, Request, Response};

fn into_result(response: Response) -> ConfigResult<Response> {
    match response {
        Response::Error { kind, message } => Err(ConfigError::from_wire(kind, message)),
        other => Ok(other),
    }
}

fn unexpected(response: Response) -> ConfigError {
    ConfigError::UnexpectedResponse(response.message_type().to_string())
}

/// RPC surface of a remote configuration service.
#[async_trait]
pub trait ConfigChannel: Send + Sync {
    /// Perform one raw request-response exchange.
    async fn call(&self, request: Request) -> ConfigResult<Response>;

    async fn get_version(&self) -> ConfigResult<String> {
        match into_result(self.call(Request::GetVersion).await?)? {
            Response::Version { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn get_compressed_data(&self) -> ConfigResult<Vec<u8>> {
        match into_result(self.call(Request::GetCompressedData).await?)? {
            Response::CompressedData { data } => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    /// `None` means the caller's version is already current.
    async fn get_compressed_data_if_newer(&self, version: &str) -> ConfigResult<Option<Vec<u8>>> {
        let request = Request::GetCompressedDataIfNewer {
            version: version.to_string(),
        };
        match into_result(self.call(request).await?)? {
            Response::CompressedData { data } => Ok(Some(data)),
            Response::UpToDate => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    async fn commit_new_data(
        &self,
        data: Vec<u8>,
        adopt_remote_version: bool,
    ) -> ConfigResult<String> {
        let request = Request::CommitNewData {
            data,
            adopt_remote_version,
        };
        match into_result(self.call(request).await?)? {
            Response::Committed { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn publish_slave(&self, url: &str) -> ConfigResult<()> {
        let request = Request::PublishSlave {
            url: url.to_string(),
        };
        match into_result(self.call(request).await?)? {
            Response::Published => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get_commit_history(&self, limit: usize) -> ConfigResult<Vec<HistoryEntry>> {
        match into_result(self.call(Request::GetCommitHistory { limit }).await?)? {
            Response::CommitHistory { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    async fn get_version_contents(&self, version: &str) -> ConfigResult<Vec<u8>> {
        let request = Request::GetVersionContents {
            version: version.to_string(),
        };
        match into_result(self.call(request).await?)? {
            Response::CompressedData { data } => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    async fn rollback_to_version(&self, version: &str) -> ConfigResult<String> {
        let request = Request::RollbackToVersion {
            version: version.to_string(),
        };
        match into_result(self.call(request).await?)? {
            Response::Committed { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn whoami(&self) -> ConfigResult<Credentials> {
        match into_result(self.call(Request::WhoAmI).await?)? {
            Response::Credentials { credentials } => Ok(credentials),
            other => Err(unexpected(other)),
        }
    }
}

/// Connect-per-call TCP implementation.
pub struct TcpChannel {
    url: String,
    credentials: Credentials,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TcpChannel {
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConfigChannel for TcpChannel {
    async fn call(&self, request: Request) -> ConfigResult<Response> {
        let addr = host_port(&self.url);
        debug!("calling {} at {addr}", request.message_type());

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConfigError::Timeout)?
            .map_err(|e| ConfigError::Transport(format!("{}: {e}", self.url)))?;
        let mut conn = FramedConnection::new(stream)
            .map_err(|e| ConfigError::Transport(format!("{}: {e}", self.url)))?
            .with_timeouts(self.io_timeout, self.io_timeout);

        conn.send(&Request::Hello {
            credentials: self.credentials.clone(),
        })
        .await?;
        match conn.recv::<Response>().await? {
            Response::HelloAck => {}
            Response::Error { kind, message } => {
                return Err(ConfigError::from_wire(kind, message));
            }
            other => return Err(unexpected(other)),
        }

        conn.send(&request).await?;
        let response = conn.recv::<Response>().await?;
        let _ = conn.close().await;
        Ok(response)
    }
}

/// Maps a server URL to a channel; lets the refresher and tests swap the
/// transport out.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Arc<dyn ConfigChannel>;
}

/// Production connector building [`TcpChannel`]s with one identity.
pub struct TcpConnector {
    credentials: Credentials,
}

impl TcpConnector {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, url: &str) -> Arc<dyn ConfigChannel> {
        Arc::new(TcpChannel::new(url, self.credentials.clone()))
    }
}
