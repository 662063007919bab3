//! # Expiry Scenarios
//!
//! Heartbeat and TTL behaviour on a paused clock. The in-memory store reads
//! `tokio::time::Instant`, so `advance` drives expiry deterministically.
//!
//! ```text
//! register ──▶ [heartbeat every interval] ──▶ record stays
//! register ──▶ [no heartbeat] ──── ttl ────▶ record gone
//! close    ──▶ delete ──── any time ───────▶ record stays gone
//! ```

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use mesh_bus::EmbeddedSubstrate;
    use mesh_node::NodeConfig;
    use mesh_types::ServerAuthPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    /// One-second heartbeat, three-second TTL.
    fn fast_config(heartbeat_enabled: bool) -> NodeConfig {
        NodeConfig {
            heartbeat_interval: Duration::from_secs(1),
            registry_ttl: Duration::from_secs(3),
            heartbeat_enabled,
            ..NodeConfig::default()
        }
    }

    async fn live_instances(substrate: &EmbeddedSubstrate, name: &str) -> usize {
        let observer = open_node(substrate, "org/observer", "OBS", Default::default()).await;
        observer
            .discovery()
            .get_service(&identity(name))
            .await
            .unwrap()
            .len()
    }

    // =========================================================================
    // TTL
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_without_heartbeat() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let mut api = open_node(&substrate, "org/api", "API", fast_config(false)).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();
        assert_eq!(live_instances(&substrate, "org/api").await, 1);

        step(2).await;
        assert_eq!(live_instances(&substrate, "org/api").await, 1);

        step(2).await;
        assert_eq!(live_instances(&substrate, "org/api").await, 0);

        // Already gone; close only has to not fail.
        api.close().await;
        assert!(api.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_record_alive() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let mut api = open_node(&substrate, "org/api", "API", fast_config(true)).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();

        let observer = open_node(&substrate, "org/observer", "OBS", Default::default()).await;
        let puts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&puts);
        let handle = observer
            .discovery()
            .watch_service(&identity("org/api"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        step(10).await;
        assert_eq!(live_instances(&substrate, "org/api").await, 1);
        // Initial value plus one refresh per elapsed interval.
        assert!(puts.load(Ordering::SeqCst) >= 10);

        handle.stop().await;
        api.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resurrection_after_close() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let mut api = open_node(&substrate, "org/api", "API", fast_config(true)).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();
        step(2).await;

        api.close().await;
        assert_eq!(live_instances(&substrate, "org/api").await, 0);

        step(10).await;
        assert_eq!(live_instances(&substrate, "org/api").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_silent_to_watchers() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let observer = open_node(&substrate, "org/observer", "OBS", Default::default()).await;
        let deletes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deletes);
        let handle = observer
            .discovery()
            .watch_all(move |_, _, deleted| {
                if deleted {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        let mut api = open_node(&substrate, "org/api", "API", fast_config(false)).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();
        step(5).await;

        assert_eq!(live_instances(&substrate, "org/api").await, 0);
        assert_eq!(deletes.load(Ordering::SeqCst), 0);

        handle.stop().await;
        api.close().await;
    }
}
