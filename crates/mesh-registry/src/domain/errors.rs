//! # Error Types

use mesh_bus::BusError;
use mesh_types::{IdentityError, WireError};
use std::time::Duration;
use thiserror::Error;

/// Malformed configuration description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Field or section name is empty or contains a dot or whitespace.
    #[error("invalid field name {name:?} under {scope:?}")]
    InvalidName { scope: String, name: String },

    /// `service:` tag does not name a valid `org/repo`.
    #[error("field {path}: invalid service dependency {value:?}: {source}")]
    InvalidDependency {
        path: String,
        value: String,
        #[source]
        source: IdentityError,
    },

    /// `env:` tag with no name.
    #[error("field {path}: empty env override")]
    EmptyEnvKey { path: String },

    /// Two fields share a path.
    #[error("duplicate field path {0}")]
    DuplicatePath(String),

    /// Two fields map to the same environment variable.
    #[error("env key {env_key} used by both {first} and {second}")]
    DuplicateEnvKey {
        env_key: String,
        first: String,
        second: String,
    },

    /// Nesting exceeds the supported depth (usually a self-referencing description).
    #[error("configuration nested deeper than {max} levels at {path}")]
    TooDeep { path: String, max: usize },
}

/// Secret reference resolution failures. All are fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("malformed secret reference {reference:?}: {reason}")]
    InvalidReference {
        reference: String,
        reason: &'static str,
    },

    #[error("no resolver registered for scheme {scheme:?}")]
    UnknownScheme { scheme: String },

    /// The backend failed to produce a value.
    #[error("{scheme} backend failed for {location:?}: {message}")]
    Backend {
        scheme: String,
        location: String,
        message: String,
    },

    /// Failure while resolving a specific configuration key.
    #[error("resolving {key}: {source}")]
    Key {
        key: String,
        #[source]
        source: Box<SecretError>,
    },
}

/// Registration, discovery and drift-check failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A substrate round trip failed.
    #[error("{op} {key}: {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: BusError,
    },

    /// A substrate round trip exceeded its timeout.
    #[error("{op} {key}: timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        key: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("invalid registrar configuration: {0}")]
    InvalidConfig(String),

    /// `register` was called a second time.
    #[error("already registered as {0}")]
    AlreadyRegistered(String),

    /// Declared dependencies with no live instance.
    #[error("unavailable dependencies: {}", .0.join(", "))]
    DependenciesUnavailable(Vec<String>),
}
