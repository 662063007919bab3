//! # Mesh Manager
//!
//! Facade over the registry components for one service process.
//!
//! `parse` is the single startup step: resolve secret references, extract the
//! field schema, fill defaults and check required keys, then register. Any
//! failure aborts before the registry is written. `close` is the shutdown
//! step and may be called any number of times.

use mesh_bus::Connection;
use mesh_registry::{
    extract_fields, on_rotate, publish_rotation, ConfigSource, Configurable, Discovery,
    DriftChecker, Registrar, RegistryError, SchemaError, SecretError, SecretPreprocessor,
    WatchHandle,
};
use mesh_types::{
    FieldDescriptor, InstanceInfo, RegistryKey, ServiceIdentity, ServiceRegistration, SourceInfo,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, NodeConfig};

/// Startup and lifecycle failures.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("missing required configuration: {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("manager is closed")]
    Closed,
}

/// One service's view of the mesh.
pub struct MeshManager {
    prefix: String,
    source: SourceInfo,
    config: NodeConfig,
    connection: Connection,
    secrets: SecretPreprocessor,
    registrar: Registrar,
    discovery: Discovery,
    fields: Vec<FieldDescriptor>,
    closed: bool,
}

impl MeshManager {
    /// Validate `config` and bind to `connection`. Nothing is written yet.
    pub fn new(
        prefix: &str,
        source: SourceInfo,
        config: NodeConfig,
        connection: Connection,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let registrar = Registrar::new(connection.kv(), config.registrar_config())?;
        let discovery = Discovery::new(connection.kv()).with_op_timeout(config.op_timeout);
        Ok(Self {
            prefix: prefix.to_string(),
            source,
            config,
            connection,
            secrets: SecretPreprocessor::with_defaults(),
            registrar,
            discovery,
            fields: Vec::new(),
            closed: false,
        })
    }

    /// Replace the secret backends (`echo` and `file` by default).
    #[must_use]
    pub fn with_secrets(mut self, secrets: SecretPreprocessor) -> Self {
        self.secrets = secrets;
        self
    }

    /// Resolve, validate and register configuration type `C`.
    ///
    /// Returns the resolved source with defaults filled in, ready for the
    /// caller's own parsing.
    pub async fn parse<C: Configurable>(
        &mut self,
        source: &ConfigSource,
    ) -> Result<ConfigSource, ManagerError> {
        if self.closed {
            return Err(ManagerError::Closed);
        }

        let mut resolved = self.secrets.resolve(source).await?;
        let fields = extract_fields::<C>(&self.prefix)?;
        resolved.apply_defaults(&fields);
        let missing = resolved.missing_required(&fields);
        if !missing.is_empty() {
            return Err(ManagerError::MissingRequired(
                missing.into_iter().map(str::to_string).collect(),
            ));
        }

        if self.config.registration_enabled {
            let instance = InstanceInfo::generate(self.config.host.clone());
            self.registrar
                .register(self.source.clone(), instance, fields.clone())
                .await?;
        } else {
            info!(service = %self.source.identity, "Registration disabled");
        }
        self.fields = fields;
        Ok(resolved)
    }

    /// Stop the heartbeat and delete the record.
    ///
    /// A failed delete is logged; the TTL reclaims the key.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.registrar.deregister().await {
            warn!(service = %self.source.identity, error = %e, "Deregister failed, record will expire");
        }
        info!(service = %self.source.identity, "Mesh manager closed");
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn identity(&self) -> &ServiceIdentity {
        &self.source.identity
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Fields extracted by the last successful `parse`.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// The live registration, if registered.
    #[must_use]
    pub fn registration(&self) -> Option<&ServiceRegistration> {
        self.registrar.registration()
    }

    #[must_use]
    pub fn key(&self) -> Option<&RegistryKey> {
        self.registrar.key()
    }

    #[must_use]
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    #[must_use]
    pub fn drift_checker(&self) -> DriftChecker {
        DriftChecker::new(Arc::new(self.discovery.clone()))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Announce a rotation of the secret at `path`.
    pub async fn publish_rotation(&self, path: &str) -> Result<usize, RegistryError> {
        publish_rotation(self.connection.bus().as_ref(), path).await
    }

    /// Call `handler(path)` for every rotation announced on the mesh.
    pub async fn on_rotate<F>(&self, handler: F) -> Result<WatchHandle, RegistryError>
    where
        F: FnMut(String) + Send + 'static,
    {
        on_rotate(self.connection.bus().as_ref(), handler).await
    }
}

impl std::fmt::Debug for MeshManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshManager")
            .field("prefix", &self.prefix)
            .field("identity", &self.source.identity)
            .field("key", &self.registrar.key())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
