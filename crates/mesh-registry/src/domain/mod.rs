//! Domain Layer - pure logic with no I/O
//!
//! - Field extraction from typed configuration descriptions
//! - Drift classification between two descriptor sets
//! - Explicit configuration sources and secret references

pub mod drift;
pub mod errors;
pub mod fields;
pub mod secrets;

pub use drift::{diff, has_breaking, DriftAttribute, DriftEntry, DriftKind};
pub use errors::{RegistryError, SchemaError, SecretError};
pub use fields::{
    dependencies, extract_fields, extract_with, required, secrets, Configurable, SchemaBuilder,
    SemanticType,
};
pub use secrets::{ConfigSource, SecretReference, REFERENCE_PREFIX};
