//! Common error types for bucketsync.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Remote operation that produced a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    /// Existence probe for a single key.
    Head,
    /// Object write.
    Put,
    /// Listing page fetch.
    List,
    /// Batched delete.
    DeleteBatch,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOp::Head => "head",
            RemoteOp::Put => "put",
            RemoteOp::List => "list",
            RemoteOp::DeleteBatch => "delete batch",
        };
        f.write_str(name)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {})", code),
        None => String::new(),
    }
}

/// Top-level error type for bucketsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration, raised before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A remote call failed.
    #[error("Remote {op} failed for `{key}`{}: {message}", status_suffix(.status))]
    Remote {
        op: RemoteOp,
        key: String,
        status: Option<u16>,
        message: String,
    },

    /// One chunk of a batched delete failed.
    ///
    /// Batches before `batch` are assumed deleted; `batch` and later are not.
    #[error("Delete batch {batch} of {batches} failed after {deleted} keys were removed: {source}")]
    BatchDelete {
        batch: usize,
        batches: usize,
        deleted: usize,
        #[source]
        source: Box<Error>,
    },

    /// The hash cache could not be persisted.
    #[error("Cache error for {}: {message}", .path.display())]
    Cache { path: PathBuf, message: String },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Build a remote transport error.
    pub fn remote(
        op: RemoteOp,
        key: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Error::Remote {
            op,
            key: key.into(),
            status,
            message: message.into(),
        }
    }

    /// Status code reported by the remote store, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => *status,
            Error::BatchDelete { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether this error is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
