//! Crate-wide error taxonomy
//!
//! Every RPC-visible failure maps onto a structured kind so that callers
//! can distinguish refetch-and-retry cases (stale version) from hard
//! failures (name mismatch, not-master, transport).

use thiserror::Error;

use crate::protocol::ErrorKind;
use crate::tree::TreeError;

/// Errors surfaced by the store, service, client and refresher.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("version mismatch: server is at {expected}, push is based on {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("configuration name mismatch: expected {expected}, got {got}")]
    NameMismatch { expected: String, got: String },

    #[error("this node is not the master and cannot accept writes")]
    NotMaster,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed snapshot: {0}")]
    BadSnapshot(String),

    #[error("configuration name is not set")]
    MissingName,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out")]
    Timeout,

    #[error("all servers failed: {0}")]
    AllServersFailed(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A structured rejection reported by the remote peer.
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConfigError {
    /// Wire representation for the RPC error response.
    pub fn to_wire(&self) -> (ErrorKind, String) {
        (self.kind(), self.to_string())
    }

    /// Reconstruct a structured error from a wire error response.
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        ConfigError::Remote { kind, message }
    }

    /// Structured kind of this error, local or remote.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            ConfigError::NameMismatch { .. } => ErrorKind::NameMismatch,
            ConfigError::NotMaster => ErrorKind::NotMaster,
            ConfigError::NotFound(_) => ErrorKind::NotFound,
            ConfigError::BadSnapshot(_) | ConfigError::Compression(_) => ErrorKind::BadSnapshot,
            ConfigError::Remote { kind, .. } => *kind,
            _ => ErrorKind::Internal,
        }
    }

    /// True for failures a client can resolve by refetching and retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::VersionMismatch
    }
}

/// Convenience alias used throughout the crate.
pub type ConfigResult<T> = Result<T, ConfigError>;
