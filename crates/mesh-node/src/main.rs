//! # Mesh Node
//!
//! Runs one service instance through the full mesh lifecycle:
//!
//! 1. Load node configuration and initialize logging
//! 2. Select the auth mode and connect to the substrate
//! 3. Resolve secrets, extract the schema, register
//! 4. Log registry changes and secret rotations until Ctrl+C
//! 5. Deregister

use anyhow::{Context, Result};
use mesh_bus::{EmbeddedSubstrate, FileKvStore, InMemoryKvStore, KeyValueStore};
use mesh_node::{AuthConfigurator, MeshManager, NodeConfig};
use mesh_registry::{ConfigSource, Configurable, SchemaBuilder};
use mesh_telemetry::{init_logging, TelemetryConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment prefix of the node's own settings.
const PREFIX: &str = "NODE";

/// The settings this node publishes to the registry.
struct NodeSettings;

impl Configurable for NodeSettings {
    fn describe(schema: &mut SchemaBuilder) {
        schema
            .field::<SocketAddr>("Listen", "default:0.0.0.0:8080")
            .field::<PathBuf>("DataDir", "default:./data")
            .field::<Duration>("DrainTimeout", "default:5s")
            .field::<String>("AdminToken", "mask");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = ConfigSource::from_env();
    let config = NodeConfig::from_source(&env).context("loading node configuration")?;

    let telemetry = match &config.node_name {
        Some(name) => TelemetryConfig {
            service_name: name.clone(),
            ..TelemetryConfig::from_env()
        },
        None => TelemetryConfig::from_env(),
    };
    init_logging(&telemetry).context("initializing logging")?;

    let auth = AuthConfigurator::from_source(&config.auth_dir, &env)
        .context("selecting auth mode")?;
    let policy = auth.server_policy().context("loading server auth material")?;
    let credentials = auth
        .client_credentials()
        .context("loading client auth material")?;

    let store: Arc<dyn KeyValueStore> = match &config.registry_dir {
        Some(dir) => Arc::new(
            FileKvStore::open(dir.clone())
                .await
                .with_context(|| format!("opening registry at {}", dir.display()))?,
        ),
        None => Arc::new(InMemoryKvStore::new()),
    };
    let substrate = EmbeddedSubstrate::with_store(policy, store);
    let connection = substrate
        .connect(&credentials)
        .await
        .context("connecting to substrate")?;

    let mut manager = MeshManager::new(PREFIX, mesh_types::build_info!(), config, connection)
        .context("creating mesh manager")?;
    manager
        .parse::<NodeSettings>(&env)
        .await
        .context("parsing node settings")?;

    let registry_watch = manager
        .discovery()
        .watch_all(|key, registration, deleted| {
            if deleted {
                info!(key = %key, "Instance left");
            } else if let Some(registration) = registration {
                info!(
                    key = %key,
                    service = %registration.identity(),
                    fields = registration.fields.len(),
                    "Instance updated"
                );
            }
        })
        .await
        .context("watching registry")?;
    let rotation_watch = manager
        .on_rotate(|path| info!(path = %path, "Secret rotated, restart to pick it up"))
        .await
        .context("subscribing to rotations")?;

    info!(
        service = %manager.identity(),
        principal = manager.connection().principal(),
        "Node is running. Press Ctrl+C to stop."
    );
    tokio::signal::ctrl_c().await?;

    registry_watch.stop().await;
    rotation_watch.stop().await;
    manager.close().await;
    Ok(())
}
