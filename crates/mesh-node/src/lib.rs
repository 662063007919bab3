//! # Mesh Node
//!
//! Startup and shutdown glue for a service joining the mesh.
//!
//! ## Startup Sequence
//!
//! ```text
//! ConfigSource (env) ─▶ NodeConfig ─▶ AuthConfigurator ─▶ EmbeddedSubstrate::connect
//!                                                                │
//!               MeshManager::parse::<C>() ◀──────── Connection ──┘
//!                 1. resolve secret references
//!                 2. extract fields, apply defaults, check required
//!                 3. register + heartbeat
//! ```
//!
//! Shutdown is `MeshManager::close()`: stop the heartbeat, delete the record.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod config;
pub mod manager;

pub use auth::{AuthConfigurator, AuthError, Ed25519Signer};
pub use config::{ConfigError, NodeConfig};
pub use manager::{ManagerError, MeshManager};
