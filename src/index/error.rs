//! Index error types
//!
//! Defines all errors that can occur while building, publishing or
//! querying an index generation.

use thiserror::Error;

/// Errors that can occur in the index layer
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Dump could not be read as CSV
    #[error("CSV error: {0}")]
    Csv(String),

    /// Data corruption detected (length mismatch, checksum mismatch, bad record)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// No generation has been published yet
    #[error("No index generation published")]
    NoGeneration,

    /// The CURRENT manifest is unreadable or inconsistent
    #[error("Invalid generation manifest: {0}")]
    InvalidManifest(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<csv::Error> for IndexError {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(e) => IndexError::Io(e),
            other => IndexError::Csv(format!("{:?}", other)),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::NoGeneration;
        assert_eq!(err.to_string(), "No index generation published");

        let err = IndexError::Corruption("hashes.bin has 9 bytes".to_string());
        assert_eq!(err.to_string(), "Corrupt data: hashes.bin has 9 bytes");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let index_err: IndexError = io_err.into();
        assert!(matches!(index_err, IndexError::Io(_)));
    }
}
