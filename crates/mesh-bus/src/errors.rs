//! # Error Types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the substrate.
#[derive(Debug, Error)]
pub enum BusError {
    /// Key or subject is not a valid dot-delimited name.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// Watch or subscribe pattern is malformed.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    /// TTL cannot be represented by the store.
    #[error("ttl out of range: {0:?}")]
    InvalidTtl(std::time::Duration),

    /// Filesystem failure in a directory-backed store.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored entry could not be decoded.
    #[error("corrupt entry {key:?}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Connection refused by the auth policy.
    #[error("authorization violation: {0}")]
    Unauthorized(String),

    /// Subject outside the connection's permissions.
    #[error("permission denied to {action} on {subject:?}")]
    PermissionDenied {
        action: &'static str,
        subject: String,
    },

    /// Credential material could not be parsed.
    #[error("malformed credential: {0}")]
    Credential(String),
}

impl BusError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
