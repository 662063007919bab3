//! # Drift Cross-Reference Checks
//!
//! Checks that need the live registry: are my dependencies up, and who
//! depends on me.

use mesh_types::{FieldDescriptor, ServiceIdentity};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{self, DriftEntry, RegistryError};
use crate::ports::RegistryQuery;

/// Availability of one declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    #[serde(serialize_with = "serialize_identity")]
    pub identity: ServiceIdentity,
    /// Environment keys of the fields declaring the dependency.
    pub fields: Vec<String>,
    pub available: bool,
    /// Live instances found.
    pub instances: usize,
}

fn serialize_identity<S: serde::Serializer>(
    identity: &ServiceIdentity,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(identity)
}

/// Result of [`DriftChecker::check_dependencies_available`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub dependencies: Vec<DependencyStatus>,
}

impl DependencyReport {
    /// Dependencies with no live instance.
    #[must_use]
    pub fn unavailable(&self) -> Vec<&DependencyStatus> {
        self.dependencies.iter().filter(|d| !d.available).collect()
    }

    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.dependencies.iter().all(|d| d.available)
    }

    /// Turn unavailable dependencies into an error.
    pub fn ensure_available(&self) -> Result<(), RegistryError> {
        let missing: Vec<String> = self
            .unavailable()
            .into_iter()
            .map(|d| d.identity.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::DependenciesUnavailable(missing))
        }
    }
}

/// Drift checks against a live registry.
#[derive(Clone)]
pub struct DriftChecker {
    registry: Arc<dyn RegistryQuery>,
}

impl DriftChecker {
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryQuery>) -> Self {
        Self { registry }
    }

    /// Pure field diff; see [`domain::diff`].
    #[must_use]
    pub fn diff(&self, current: &[FieldDescriptor], candidate: &[FieldDescriptor]) -> Vec<DriftEntry> {
        domain::diff(current, candidate)
    }

    /// Query the registry for every dependency declared in `fields`.
    ///
    /// Each dependency is reported once, in declaration order, with every
    /// field that declares it.
    pub async fn check_dependencies_available(
        &self,
        fields: &[FieldDescriptor],
    ) -> Result<DependencyReport, RegistryError> {
        let mut report = DependencyReport::default();
        for identity in domain::dependencies(fields) {
            let declaring = fields
                .iter()
                .filter(|f| f.dependency.as_ref() == Some(&identity))
                .map(|f| f.env_key.clone())
                .collect();
            let instances = self.registry.get_service(&identity).await?.len();
            debug!(dependency = %identity, instances, "Dependency checked");
            report.dependencies.push(DependencyStatus {
                identity,
                fields: declaring,
                available: instances > 0,
                instances,
            });
        }
        if !report.is_satisfied() {
            info!(
                unavailable = report.unavailable().len(),
                "Unavailable dependencies found"
            );
        }
        Ok(report)
    }

    /// Services with a live registration declaring a dependency on
    /// `identity`, excluding `identity` itself. Sorted, no duplicates.
    pub async fn check_consumer_impact(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Vec<ServiceIdentity>, RegistryError> {
        let mut consumers: Vec<ServiceIdentity> = self
            .registry
            .get_all_services()
            .await?
            .into_iter()
            .filter(|r| r.identity() != identity && r.depends_on(identity))
            .map(|r| r.identity().clone())
            .collect();
        consumers.sort();
        consumers.dedup();
        debug!(service = %identity, consumers = consumers.len(), "Consumer impact checked");
        Ok(consumers)
    }
}
