//! # Mesh Registry
//!
//! Turns a typed configuration description into a registry record, keeps it
//! alive under a TTL, streams change notifications to watchers, and diffs two
//! records to classify configuration drift.
//!
//! ## Architecture
//!
//! - **Domain Layer:** pure field extraction, drift diff, config sources
//! - **Ports Layer:** `SecretResolver` (driven), `RegistryQuery` (driving)
//! - **Service Layer:** registrar, discovery, drift checks, rotation
//! - **Adapters Layer:** echo and file secret backends
//!
//! ## Data Flow
//!
//! ```text
//! ConfigSource ─▶ SecretPreprocessor ─▶ extract_fields ─▶ Registrar ─▶ KV store
//!                                                                       │
//!                                   Discovery / DriftChecker ◀──────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use mesh_registry::{extract_fields, Configurable, SchemaBuilder};
//!
//! struct Db;
//! impl Configurable for Db {
//!     fn describe(schema: &mut SchemaBuilder) {
//!         schema
//!             .field::<String>("Password", "required,mask")
//!             .field::<String>("Host", "default:localhost");
//!     }
//! }
//!
//! struct App;
//! impl Configurable for App {
//!     fn describe(schema: &mut SchemaBuilder) {
//!         schema.nested::<Db>("DB");
//!     }
//! }
//!
//! let fields = extract_fields::<App>("APP").unwrap();
//! assert_eq!(fields[0].env_key, "APP_DB_PASSWORD");
//! assert_eq!(fields[1].default, "localhost");
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod domain;
pub mod ports;
pub mod service;

// =============================================================================
// ADAPTERS
// =============================================================================

pub mod adapters;

pub use adapters::{EchoResolver, FileResolver};
pub use domain::{
    dependencies, diff, extract_fields, extract_with, has_breaking, required, secrets,
    ConfigSource, Configurable, DriftAttribute, DriftEntry, DriftKind, RegistryError,
    SchemaBuilder, SchemaError, SecretError, SecretReference, SemanticType,
};
pub use ports::{RegistryQuery, SecretResolver};
pub use service::{
    on_rotate, publish_rotation, DependencyReport, DependencyStatus, Discovery, DriftChecker,
    Registrar, RegistrarConfig, RegistryEvent, RegistryEventStream, RegistrySnapshot,
    SecretPreprocessor, WatchHandle, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_OP_TIMEOUT,
    ROTATION_SUBJECT_PREFIX, TTL_MULTIPLIER,
};
