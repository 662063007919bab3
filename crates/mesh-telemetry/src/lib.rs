//! # Mesh Telemetry
//!
//! Logging initialization shared by the node binary and the tools.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MESH_SERVICE_NAME` | `wellknown-mesh` | Service name attached to startup logs |
//! | `MESH_LOG_LEVEL` / `RUST_LOG` | `info` | Filter directive |
//! | `MESH_JSON_LOGS` | `true` in containers | JSON output |
//! | `MESH_CONSOLE_OUTPUT` | `true` | Emit to stderr at all |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter {directive:?}: {message}")]
    Filter { directive: String, message: String },

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}
