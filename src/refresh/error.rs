//! Refresh error types

use crate::index::IndexError;
use thiserror::Error;

/// Errors that can occur while refreshing the index
#[derive(Error, Debug)]
pub enum RefreshError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an unexpected status
    #[error("Unexpected HTTP status: {status}")]
    Status { status: u16 },

    /// No data arrived within the idle timeout
    #[error("Timed out waiting for data")]
    Timeout,

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Index build or publish failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The manifest endpoint returned no dump URL
    #[error("Manifest did not contain a dump URL")]
    NoManifestUrl,

    /// Compressed dump is not valid gzip
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// State file could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking stage panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl RefreshError {
    /// Network failures worth retrying on the next tick
    pub fn is_transient(&self) -> bool {
        match self {
            RefreshError::Http(_) | RefreshError::Timeout => true,
            RefreshError::Status { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for RefreshError {
    fn from(err: tokio::task::JoinError) -> Self {
        RefreshError::Task(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RefreshError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RefreshError::Timeout
    }
}

/// Result type alias for refresh operations
pub type RefreshResult<T> = Result<T, RefreshError>;
