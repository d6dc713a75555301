//! Replication protocol messages
//!
//! Requests and responses are serde enums shipped as bincode inside
//! length-prefixed frames. Every connection opens with a `Hello` carrying
//! the caller's credentials; the service derives the committer identity
//! from them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of the caller, as asserted by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub group: String,
    pub dn: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        group: impl Into<String>,
        dn: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            group: group.into(),
            dn: dn.into(),
        }
    }

    /// Committer identity recorded on touched nodes and in backup names.
    pub fn committer_id(&self) -> String {
        format!("{}@{} - {}", self.username, self.group, self.dn)
    }
}

/// One archived commit as reported over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub committer: String,
    pub version: String,
}

/// Structured reason for a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ErrorKind {
    #[error("version mismatch")]
    VersionMismatch,
    #[error("configuration name mismatch")]
    NameMismatch,
    #[error("not master")]
    NotMaster,
    #[error("not found")]
    NotFound,
    #[error("malformed snapshot")]
    BadSnapshot,
    #[error("internal error")]
    Internal,
}

/// Protocol requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Connection opener; must precede everything else.
    Hello { credentials: Credentials },
    GetVersion,
    GetCompressedData,
    GetCompressedDataIfNewer { version: String },
    /// Push a complete replacement snapshot. With `adopt_remote_version`
    /// set, the server overwrites the snapshot's version with its own
    /// before the equality check ("just take my tree").
    CommitNewData {
        data: Vec<u8>,
        adopt_remote_version: bool,
    },
    PublishSlave { url: String },
    GetCommitHistory { limit: usize },
    GetVersionContents { version: String },
    RollbackToVersion { version: String },
    WhoAmI,
}

/// Protocol responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    HelloAck,
    Version { version: String },
    CompressedData { data: Vec<u8> },
    /// The caller's copy is already current.
    UpToDate,
    Committed { version: String },
    Published,
    CommitHistory { entries: Vec<HistoryEntry> },
    Credentials { credentials: Credentials },
    Error { kind: ErrorKind, message: String },
}

impl Request {
    /// Message type label for logging.
    pub fn message_type(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "Hello",
            Request::GetVersion => "GetVersion",
            Request::GetCompressedData => "GetCompressedData",
            Request::GetCompressedDataIfNewer { .. } => "GetCompressedDataIfNewer",
            Request::CommitNewData { .. } => "CommitNewData",
            Request::PublishSlave { .. } => "PublishSlave",
            Request::GetCommitHistory { .. } => "GetCommitHistory",
            Request::GetVersionContents { .. } => "GetVersionContents",
            Request::RollbackToVersion { .. } => "RollbackToVersion",
            Request::WhoAmI => "WhoAmI",
        }
    }
}

impl Response {
    pub fn message_type(&self) -> &'static str {
        match self {
            Response::HelloAck => "HelloAck",
            Response::Version { .. } => "Version",
            Response::CompressedData { .. } => "CompressedData",
            Response::UpToDate => "UpToDate",
            Response::Committed { .. } => "Committed",
            Response::Published => "Published",
            Response::CommitHistory { .. } => "CommitHistory",
            Response::Credentials { .. } => "Credentials",
            Response::Error { .. } => "Error",
        }
    }
}
