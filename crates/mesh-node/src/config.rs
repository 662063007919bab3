//! # Node Configuration
//!
//! Registration timing, auth directory and registry location.
//!
//! ## Sources (later wins)
//!
//! 1. Built-in defaults
//! 2. TOML file named by `MESH_CONFIG`
//! 3. Environment keys of the [`ConfigSource`]
//!
//! | Key                         | Meaning                              | Default     |
//! |-----------------------------|--------------------------------------|-------------|
//! | `MESH_HEARTBEAT_INTERVAL`   | heartbeat interval, seconds          | 10          |
//! | `MESH_REGISTRY_TTL`         | record TTL, seconds                  | 3x interval |
//! | `MESH_OP_TIMEOUT_MS`        | substrate round-trip timeout, ms     | 5000        |
//! | `MESH_DISABLE_REGISTRATION` | skip registration entirely           | false       |
//! | `MESH_DISABLE_HEARTBEAT`    | write once, let the TTL lapse        | false       |
//! | `MESH_AUTH_DIR`             | local auth material                  | `.auth`     |
//! | `MESH_HOST`                 | host recorded in the instance info   | empty       |
//! | `MESH_NODE_NAME`            | service name used in logs            | unset       |
//! | `MESH_REGISTRY_DIR`         | directory-backed registry store      | in-memory   |

use mesh_registry::{ConfigSource, RegistrarConfig, TTL_MULTIPLIER};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_ENV: &str = "MESH_CONFIG";

const HEARTBEAT_INTERVAL_ENV: &str = "MESH_HEARTBEAT_INTERVAL";
const REGISTRY_TTL_ENV: &str = "MESH_REGISTRY_TTL";
const OP_TIMEOUT_ENV: &str = "MESH_OP_TIMEOUT_MS";
const DISABLE_REGISTRATION_ENV: &str = "MESH_DISABLE_REGISTRATION";
const DISABLE_HEARTBEAT_ENV: &str = "MESH_DISABLE_HEARTBEAT";
const AUTH_DIR_ENV: &str = "MESH_AUTH_DIR";
const HOST_ENV: &str = "MESH_HOST";
const NODE_NAME_ENV: &str = "MESH_NODE_NAME";
const REGISTRY_DIR_ENV: &str = "MESH_REGISTRY_DIR";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{key}={value:?}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("invalid node configuration: {0}")]
    Invalid(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub heartbeat_interval: Duration,
    /// Must exceed `heartbeat_interval`.
    pub registry_ttl: Duration,
    pub op_timeout: Duration,
    pub registration_enabled: bool,
    pub heartbeat_enabled: bool,
    pub auth_dir: PathBuf,
    pub host: String,
    pub node_name: Option<String>,
    /// Directory-backed registry; in-memory when unset.
    pub registry_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let registrar = RegistrarConfig::default();
        Self {
            heartbeat_interval: registrar.heartbeat_interval,
            registry_ttl: registrar.ttl,
            op_timeout: registrar.op_timeout,
            registration_enabled: true,
            heartbeat_enabled: true,
            auth_dir: PathBuf::from(".auth"),
            host: String::new(),
            node_name: None,
            registry_dir: None,
        }
    }
}

/// TOML file layout. Every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    heartbeat_interval_secs: Option<u64>,
    registry_ttl_secs: Option<u64>,
    op_timeout_ms: Option<u64>,
    disable_registration: Option<bool>,
    disable_heartbeat: Option<bool>,
    auth_dir: Option<PathBuf>,
    host: Option<String>,
    node_name: Option<String>,
    registry_dir: Option<PathBuf>,
}

/// Values from one layer, before TTL derivation.
#[derive(Debug, Default)]
struct Layer {
    interval: Option<Duration>,
    ttl: Option<Duration>,
}

impl NodeConfig {
    /// Load from `source`, layering the `MESH_CONFIG` file beneath it.
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut layer = Layer::default();

        if let Some(path) = source.get(CONFIG_FILE_ENV).filter(|p| !p.is_empty()) {
            let file = read_file(Path::new(path))?;
            config.apply_file(file, &mut layer);
        }
        config.apply_source(source, &mut layer)?;
        config.finish(layer)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let mut config = Self::default();
        let mut layer = Layer::default();
        config.apply_file(file, &mut layer);
        config.finish(layer)
    }

    /// Derive the TTL (3x interval unless set) and validate.
    fn finish(mut self, layer: Layer) -> Result<Self, ConfigError> {
        if let Some(interval) = layer.interval {
            self.heartbeat_interval = interval;
        }
        self.registry_ttl = layer
            .ttl
            .unwrap_or_else(|| self.heartbeat_interval.saturating_mul(TTL_MULTIPLIER));
        self.validate()?;
        Ok(self)
    }

    fn apply_file(&mut self, file: FileConfig, layer: &mut Layer) {
        if let Some(secs) = file.heartbeat_interval_secs {
            layer.interval = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.registry_ttl_secs {
            layer.ttl = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = file.op_timeout_ms {
            self.op_timeout = Duration::from_millis(ms);
        }
        if let Some(disabled) = file.disable_registration {
            self.registration_enabled = !disabled;
        }
        if let Some(disabled) = file.disable_heartbeat {
            self.heartbeat_enabled = !disabled;
        }
        if let Some(dir) = file.auth_dir {
            self.auth_dir = dir;
        }
        if let Some(host) = file.host {
            self.host = host;
        }
        if file.node_name.is_some() {
            self.node_name = file.node_name;
        }
        if file.registry_dir.is_some() {
            self.registry_dir = file.registry_dir;
        }
    }

    fn apply_source(&mut self, source: &ConfigSource, layer: &mut Layer) -> Result<(), ConfigError> {
        if let Some(secs) = parse_u64(source, HEARTBEAT_INTERVAL_ENV)? {
            layer.interval = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_u64(source, REGISTRY_TTL_ENV)? {
            layer.ttl = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = parse_u64(source, OP_TIMEOUT_ENV)? {
            self.op_timeout = Duration::from_millis(ms);
        }
        if let Some(disabled) = parse_bool(source, DISABLE_REGISTRATION_ENV)? {
            self.registration_enabled = !disabled;
        }
        if let Some(disabled) = parse_bool(source, DISABLE_HEARTBEAT_ENV)? {
            self.heartbeat_enabled = !disabled;
        }
        if let Some(dir) = non_empty(source, AUTH_DIR_ENV) {
            self.auth_dir = PathBuf::from(dir);
        }
        if let Some(host) = non_empty(source, HOST_ENV) {
            self.host = host.to_string();
        }
        if let Some(name) = non_empty(source, NODE_NAME_ENV) {
            self.node_name = Some(name.to_string());
        }
        if let Some(dir) = non_empty(source, REGISTRY_DIR_ENV) {
            self.registry_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject zero durations and a TTL that does not outlive the interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registrar_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Timing handed to the registrar.
    #[must_use]
    pub fn registrar_config(&self) -> RegistrarConfig {
        RegistrarConfig {
            heartbeat_interval: self.heartbeat_interval,
            ttl: self.registry_ttl,
            op_timeout: self.op_timeout,
            heartbeat_enabled: self.heartbeat_enabled,
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn non_empty<'a>(source: &'a ConfigSource, key: &str) -> Option<&'a str> {
    source.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_u64(source: &ConfigSource, key: &'static str) -> Result<Option<u64>, ConfigError> {
    non_empty(source, key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                reason: "expected a non-negative integer",
            })
        })
        .transpose()
}

fn parse_bool(source: &ConfigSource, key: &'static str) -> Result<Option<bool>, ConfigError> {
    non_empty(source, key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                reason: "expected true or false",
            }),
        })
        .transpose()
}
