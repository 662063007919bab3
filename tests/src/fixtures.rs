//! Shared fixtures: configuration types for a small fleet of services and
//! helpers to put them on one substrate.

use ed25519_dalek::SigningKey;
use mesh_bus::EmbeddedSubstrate;
use mesh_node::{AuthConfigurator, MeshManager, NodeConfig};
use mesh_registry::{ConfigSource, Configurable, SchemaBuilder};
use mesh_types::{ServiceIdentity, SourceInfo};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// CONFIGURATION TYPES
// =============================================================================

pub struct Database;

impl Configurable for Database {
    fn describe(schema: &mut SchemaBuilder) {
        schema
            .field::<String>("Password", "required,mask")
            .field::<String>("Host", "default:localhost")
            .field::<u16>("Port", "default:5432");
    }
}

/// `org/api` as deployed.
pub struct ApiV1;

impl Configurable for ApiV1 {
    fn describe(schema: &mut SchemaBuilder) {
        schema
            .nested::<Database>("DB")
            .field::<bool>("OldFlag", "default:false")
            .field::<String>("Billing", "service:org/billing");
    }
}

/// `org/api` in a pull request: drops a flag, adds a required feature key.
pub struct ApiV2;

impl Configurable for ApiV2 {
    fn describe(schema: &mut SchemaBuilder) {
        schema
            .nested::<Database>("DB")
            .field::<String>("NewFeature", "required")
            .field::<String>("Billing", "service:org/billing");
    }
}

pub struct Billing;

impl Configurable for Billing {
    fn describe(schema: &mut SchemaBuilder) {
        schema
            .field::<String>("Currency", "default:EUR")
            .field::<Duration>("SettleAfter", "default:24h");
    }
}

// =============================================================================
// HELPERS
// =============================================================================

pub fn identity(name: &str) -> ServiceIdentity {
    name.parse().unwrap()
}

pub fn source(pairs: &[(&str, &str)]) -> ConfigSource {
    pairs.iter().copied().collect()
}

/// Environment satisfying every required key of `ApiV1`.
pub fn api_env() -> ConfigSource {
    source(&[("API_DB_PASSWORD", "ref+echo://hunter2")])
}

/// A manager for `name` connected to `substrate` with open auth.
pub async fn open_node(
    substrate: &EmbeddedSubstrate,
    name: &str,
    prefix: &str,
    config: NodeConfig,
) -> MeshManager {
    let connection = substrate.connect(&Default::default()).await.unwrap();
    MeshManager::new(prefix, SourceInfo::new(identity(name)), config, connection).unwrap()
}

/// Substrate and a connected manager, both built by one configurator.
pub async fn open_authenticated(
    auth: &AuthConfigurator,
    name: &str,
    prefix: &str,
) -> (EmbeddedSubstrate, MeshManager) {
    let substrate = EmbeddedSubstrate::start(auth.server_policy().unwrap());
    let connection = substrate
        .connect(&auth.client_credentials().unwrap())
        .await
        .unwrap();
    let manager = MeshManager::new(
        prefix,
        SourceInfo::new(identity(name)),
        NodeConfig::default(),
        connection,
    )
    .unwrap();
    (substrate, manager)
}

/// Write `user.pub` and `user.nk` for a fixed seed into `dir`.
pub fn write_keypair(dir: &Path, seed: [u8; 32]) -> String {
    let public_key = hex::encode(SigningKey::from_bytes(&seed).verifying_key().as_bytes());
    std::fs::write(dir.join("user.pub"), &public_key).unwrap();
    std::fs::write(dir.join("user.nk"), hex::encode(seed)).unwrap();
    public_key
}

/// Yield long enough for spawned listeners to drain their queues.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Advance a paused clock one second at a time, letting tasks run between.
pub async fn step(secs: u64) {
    for _ in 0..secs {
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
}
