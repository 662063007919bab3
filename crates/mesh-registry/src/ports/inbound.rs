//! Inbound Ports (Driving Ports)
//!
//! Read-only view of the registry used by drift checks and tooling.

use async_trait::async_trait;
use mesh_types::{ServiceIdentity, ServiceRegistration};

use crate::domain::RegistryError;

/// Registry lookups (Driving Port)
#[async_trait]
pub trait RegistryQuery: Send + Sync {
    /// Live instances of one service.
    async fn get_service(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Vec<ServiceRegistration>, RegistryError>;

    /// Every live instance of every service.
    async fn get_all_services(&self) -> Result<Vec<ServiceRegistration>, RegistryError>;

    /// Whether at least one instance of `identity` is live.
    async fn service_exists(&self, identity: &ServiceIdentity) -> Result<bool, RegistryError> {
        Ok(!self.get_service(identity).await?.is_empty())
    }
}
