//! # Error Types
//!
//! Errors raised while building or decoding the shared records.

use thiserror::Error;

/// Errors from parsing or constructing a [`crate::ServiceIdentity`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The `org/repo` form was not respected.
    #[error("invalid service name {0:?}, expected org/repo")]
    InvalidName(String),

    /// A segment is empty.
    #[error("service identity {segment} must not be empty")]
    EmptySegment { segment: &'static str },

    /// A segment contains a character reserved by the key namespace.
    #[error("service identity {segment} {value:?} contains reserved character {found:?}")]
    ReservedCharacter {
        segment: &'static str,
        value: String,
        found: char,
    },
}

/// Errors from encoding or decoding the registry wire format.
#[derive(Debug, Error)]
pub enum WireError {
    /// Encoding failed.
    #[error("encoding registration: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not a valid registration.
    #[error("decoding registration: {0}")]
    Decode(#[source] serde_json::Error),
}
