//! The individual checks. Each writes a human-readable report to `out` and
//! returns whether it passed.

use mesh_bus::KeyValueStore;
use mesh_registry::{has_breaking, Discovery, DriftChecker, RegistryError};
use mesh_types::{FieldDescriptor, ServiceIdentity, ServiceRegistration, WireError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failures that stop a check from producing a verdict.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no live registration for {0}")]
    NotRegistered(ServiceIdentity),

    #[error("service identity required (use --repo or --schema)")]
    IdentityRequired,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("writing report: {0}")]
    Output(#[from] io::Error),
}

/// Read a full registration record.
pub fn load_registration(path: &Path) -> Result<ServiceRegistration, CheckError> {
    let bytes = read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| CheckError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the field list of a registration record or a bare JSON array.
pub fn load_fields(path: &Path) -> Result<Vec<FieldDescriptor>, CheckError> {
    let bytes = read(path)?;
    if let Ok(registration) = serde_json::from_slice::<ServiceRegistration>(&bytes) {
        return Ok(registration.fields);
    }
    serde_json::from_slice(&bytes).map_err(|source| CheckError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<Vec<u8>, CheckError> {
    std::fs::read(path).map_err(|source| CheckError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Checks against one registry.
pub struct Checker {
    discovery: Discovery,
    drift: DriftChecker,
    timeout: Duration,
}

impl Checker {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, timeout: Duration) -> Self {
        let discovery = Discovery::new(store).with_op_timeout(timeout);
        let drift = DriftChecker::new(Arc::new(discovery.clone()));
        Self {
            discovery,
            drift,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CheckError>
    where
        F: std::future::Future<Output = Result<T, RegistryError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CheckError::Timeout(self.timeout))?
            .map_err(CheckError::from)
    }

    /// The schema being checked: `schema` if given, else the live
    /// registration of `repo` (lowest key when several instances run).
    /// `repo` also overrides the identity of a file schema.
    pub async fn current(
        &self,
        schema: Option<&Path>,
        repo: Option<&ServiceIdentity>,
    ) -> Result<ServiceRegistration, CheckError> {
        if let Some(path) = schema {
            let mut registration = load_registration(path)?;
            if let Some(identity) = repo {
                registration.source.identity = identity.clone();
            }
            return Ok(registration);
        }
        let identity = repo.ok_or(CheckError::IdentityRequired)?;
        let mut instances = self.bounded(self.discovery.get_service(identity)).await?;
        instances.sort_by_key(|r| r.key().as_str().to_string());
        debug!(service = %identity, instances = instances.len(), "Live registrations found");
        instances
            .into_iter()
            .next()
            .ok_or_else(|| CheckError::NotRegistered(identity.clone()))
    }

    /// `--schema-dump`.
    pub fn schema_dump(
        &self,
        registration: &ServiceRegistration,
        out: &mut impl Write,
    ) -> Result<bool, CheckError> {
        writeln!(out, "{}", registration.to_json_pretty()?)?;
        Ok(true)
    }

    /// `--self`: diff against the candidate, or list the current fields.
    ///
    /// Fails on breaking drift unless `allow_breaking`.
    pub fn self_check(
        &self,
        registration: &ServiceRegistration,
        candidate: Option<&[FieldDescriptor]>,
        allow_breaking: bool,
        out: &mut impl Write,
    ) -> Result<bool, CheckError> {
        writeln!(out, "Service: {}", registration.identity())?;
        writeln!(out, "Instance: {}", registration.instance.id)?;
        writeln!(out)?;

        let Some(candidate) = candidate else {
            writeln!(out, "Current configuration fields:")?;
            for field in &registration.fields {
                write!(out, "  {}: {}", field.env_key, field.type_name)?;
                if field.required {
                    write!(out, " (required)")?;
                }
                if field.secret {
                    write!(out, " [secret]")?;
                }
                if let Some(dependency) = &field.dependency {
                    write!(out, " -> {dependency}")?;
                }
                writeln!(out)?;
            }
            return Ok(true);
        };

        let entries = self.drift.diff(&registration.fields, candidate);
        writeln!(out, "Changes from PR:")?;
        if entries.is_empty() {
            writeln!(out, "  No changes.")?;
            return Ok(true);
        }
        for entry in &entries {
            writeln!(out, "  {entry}")?;
        }

        if !has_breaking(&entries) {
            return Ok(true);
        }
        let breaking = entries.iter().filter(|e| e.breaking).count();
        writeln!(out)?;
        if allow_breaking {
            writeln!(out, "{breaking} breaking change(s) allowed by --allow-breaking")?;
            Ok(true)
        } else {
            writeln!(out, "{breaking} breaking change(s)")?;
            Ok(false)
        }
    }

    /// `--check-deps`: fails when any dependency has no live instance.
    pub async fn check_deps(
        &self,
        fields: &[FieldDescriptor],
        out: &mut impl Write,
    ) -> Result<bool, CheckError> {
        let report = self
            .bounded(self.drift.check_dependencies_available(fields))
            .await?;
        if report.dependencies.is_empty() {
            writeln!(out, "No dependencies declared.")?;
            return Ok(true);
        }

        writeln!(out, "Checking {} dependencies:", report.dependencies.len())?;
        for dependency in &report.dependencies {
            if dependency.available {
                writeln!(
                    out,
                    "  ✓ {}: available ({} instance(s))",
                    dependency.identity, dependency.instances
                )?;
            } else {
                writeln!(
                    out,
                    "  ✗ {}: not found (needed by {})",
                    dependency.identity,
                    dependency.fields.join(", ")
                )?;
            }
        }
        Ok(report.is_satisfied())
    }

    /// `--check-consumers`: informational, an empty list passes.
    pub async fn check_consumers(
        &self,
        identity: &ServiceIdentity,
        out: &mut impl Write,
    ) -> Result<bool, CheckError> {
        let consumers = self
            .bounded(self.drift.check_consumer_impact(identity))
            .await?;
        writeln!(out, "Checking consumers of {identity}:")?;
        if consumers.is_empty() {
            writeln!(out, "  No consumers found.")?;
            return Ok(true);
        }
        for consumer in &consumers {
            writeln!(out, "  • {consumer} depends on this service")?;
        }
        writeln!(out)?;
        writeln!(out, "{} service(s) depend on {identity}", consumers.len())?;
        Ok(true)
    }
}
