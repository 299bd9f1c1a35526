//! Error types for the block-hash index

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for index operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating on a block-hash database
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The directory is not a block-hash database
    #[error("not a block-hash database: {path}")]
    NotADatabase { path: PathBuf },

    /// The directory already holds data and cannot be created over
    #[error("directory is not empty: {path}")]
    DirectoryNotEmpty { path: PathBuf },

    /// Invalid settings document
    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },

    /// Settings version mismatch
    #[error("settings version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Databases passed to a multi-database operator are incompatible
    #[error("incompatible databases: {reason}")]
    IncompatibleDatabases { reason: String },

    /// A second writer was opened on a directory that already has one
    #[error("a writer is already open on {path}")]
    WriterActive { path: PathBuf },

    /// Invalid hex in a hash string
    #[error("invalid hex hash: {0}")]
    InvalidHash(String),

    /// Data corruption detected
    #[error("data corruption detected: {reason}")]
    CorruptData { reason: String },

    /// Bloom filter error
    #[error("bloom filter error: {0}")]
    BloomFilter(String),

    /// Error from the key-value substrate
    #[error("substrate error: {0}")]
    Substrate(#[from] redb::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid settings error
    pub fn invalid_settings<S: Into<String>>(reason: S) -> Self {
        Error::InvalidSettings {
            reason: reason.into(),
        }
    }

    /// Create an incompatible databases error
    pub fn incompatible<S: Into<String>>(reason: S) -> Self {
        Error::IncompatibleDatabases {
            reason: reason.into(),
        }
    }

    /// Create a not-a-database error
    pub fn not_a_database<P: Into<PathBuf>>(path: P) -> Self {
        Error::NotADatabase { path: path.into() }
    }

    /// Create a corrupt data error
    pub fn corrupt_data<S: Into<String>>(reason: S) -> Self {
        Error::CorruptData {
            reason: reason.into(),
        }
    }

    /// Create a bloom filter error
    pub fn bloom_filter<S: Into<String>>(message: S) -> Self {
        Error::BloomFilter(message.into())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Error::Substrate(err.into())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Error::Substrate(err.into())
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Error::Substrate(err.into())
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Error::Substrate(err.into())
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Error::Substrate(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::corrupt_data(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_settings_error() {
        let err = Error::invalid_settings("hash prefix bits must not be zero");
        assert!(matches!(err, Error::InvalidSettings { .. }));
        assert_eq!(
            err.to_string(),
            "invalid settings: hash prefix bits must not be zero"
        );
    }

    #[test]
    fn test_incompatible_error() {
        let err = Error::incompatible("unequal block sizes: 4096 vs 512");
        assert!(matches!(err, Error::IncompatibleDatabases { .. }));
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_corrupt_data_error() {
        let err = Error::corrupt_data("suffix set decode did not consume value");
        assert!(matches!(err, Error::CorruptData { .. }));
        assert!(err.to_string().contains("suffix set"));
    }

    #[test]
    fn test_version_mismatch_display() {
        let err = Error::VersionMismatch {
            expected: 3,
            found: 2,
        };
        assert!(err.to_string().contains("expected 3"));
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
