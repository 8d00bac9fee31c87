//! Crate-wide error type.
//!
//! Covers `NotFound`, `InvalidChecksum`, `BlobStore`, `InvalidFormat`,
//! `InvalidArgument`, `Cancelled`. Invariant violations are not represented
//! here — they panic (see `manager::Manager`'s `assert_invariant`), since they
//! indicate a programming error rather than a recoverable condition.

use std::io;
use thiserror::Error;

use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Error, Debug)]
pub enum ManagerError {
    /// The requested content (or index blob) does not exist, or is tombstoned.
    #[error("content not found")]
    NotFound,

    /// Post-decrypt checksum verification failed for an unauthenticated cipher.
    #[error("invalid checksum for blob {blob_id}, expected suffix {expected}, got {actual}")]
    InvalidChecksum {
        blob_id: String,
        expected: String,
        actual: String,
    },

    /// A blob store operation failed; wraps the underlying transport error.
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Malformed on-disk data: unsupported version, truncated record, bad magic.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Caller-supplied argument is invalid (bad prefix, bad options).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A cooperative cancellation token was observed during a long operation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ManagerError {
    pub fn blob_store(err: impl std::fmt::Display) -> Self {
        ManagerError::BlobStore(err.to_string())
    }

    pub fn invalid_format(msg: impl Into<String>) -> Self {
        ManagerError::InvalidFormat(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ManagerError::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::NotFound)
    }
}
