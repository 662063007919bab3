//! # Discovery Scenarios
//!
//! Several services on one substrate watching and querying each other.
//!
//! ## Coverage
//!
//! - Per-service watches see only that identity
//! - Whole-registry streams see puts and the delete on close
//! - Dependency availability flips when the dependency registers
//! - Two substrates sharing one directory-backed registry

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use mesh_bus::{EmbeddedSubstrate, FileKvStore, KeyValueStore};
    use mesh_registry::{Configurable, RegistryEvent, SchemaBuilder};
    use mesh_types::{ServerAuthPolicy, ServiceRegistration};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    /// `org/a`: needs `org/c` to be up.
    struct ServiceA;

    impl Configurable for ServiceA {
        fn describe(schema: &mut SchemaBuilder) {
            schema
                .field::<String>("Upstream", "service:org/c")
                .field::<u16>("Port", "default:8080");
        }
    }

    struct ServiceC;

    impl Configurable for ServiceC {
        fn describe(schema: &mut SchemaBuilder) {
            schema.field::<u16>("Port", "default:9090");
        }
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    // =========================================================================
    // WATCHES
    // =========================================================================

    #[tokio::test]
    async fn test_watch_service_scoped_to_identity() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let observer = open_node(&substrate, "org/observer", "OBS", Default::default()).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<ServiceRegistration>();
        let handle = observer
            .discovery()
            .watch_service(&identity("org/billing"), move |registration| {
                let _ = tx.send(registration);
            })
            .await
            .unwrap();

        let mut api = open_node(&substrate, "org/api", "API", Default::default()).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();
        let mut billing = open_node(&substrate, "org/billing", "BILLING", Default::default()).await;
        billing.parse::<Billing>(&source(&[])).await.unwrap();

        let seen = next(&mut rx).await;
        assert_eq!(seen.identity(), &identity("org/billing"));
        assert_eq!(seen.fields.len(), 2);
        assert_eq!(seen.fields[1].default, "24h");

        settle().await;
        assert!(rx.try_recv().is_err(), "org/api must not reach the billing watch");

        handle.stop().await;
        api.close().await;
        billing.close().await;
    }

    #[tokio::test]
    async fn test_subscribe_all_sees_close() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let observer = open_node(&substrate, "org/observer", "OBS", Default::default()).await;
        let (handle, mut events) = observer.discovery().subscribe_all().await.unwrap();

        let mut api = open_node(&substrate, "org/api", "API", Default::default()).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();
        let key = api.key().unwrap().to_string();

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            RegistryEvent::Updated { key: seen, registration } => {
                assert_eq!(seen, key);
                assert_eq!(registration.identity(), &identity("org/api"));
            }
            other => panic!("expected update, got {other:?}"),
        }

        api.close().await;
        let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, RegistryEvent::Removed { key });

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_snapshot_tracks_instances() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let observer = open_node(&substrate, "org/observer", "OBS", Default::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let watch = observer
            .discovery()
            .watch_all(move |_, _, deleted| {
                let _ = tx.send(deleted);
            })
            .await
            .unwrap();
        let (handle, snapshot) = observer.discovery().snapshot().await.unwrap();

        let mut first = open_node(&substrate, "org/api", "API", Default::default()).await;
        first.parse::<ApiV1>(&api_env()).await.unwrap();
        let mut second = open_node(&substrate, "org/api", "API", Default::default()).await;
        second.parse::<ApiV1>(&api_env()).await.unwrap();
        assert!(!next(&mut rx).await);
        assert!(!next(&mut rx).await);
        settle().await;

        assert_eq!(snapshot.instances(&identity("org/api")).len(), 2);
        assert_eq!(snapshot.services(), vec![identity("org/api")]);

        first.close().await;
        assert!(next(&mut rx).await);
        settle().await;
        assert_eq!(snapshot.instances(&identity("org/api")).len(), 1);
        assert!(snapshot.get(second.key().unwrap().as_str()).is_some());

        second.close().await;
        handle.stop().await;
        watch.stop().await;
    }

    // =========================================================================
    // DEPENDENCIES AND CONSUMERS
    // =========================================================================

    #[tokio::test]
    async fn test_dependency_becomes_available() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let mut a = open_node(&substrate, "org/a", "A", Default::default()).await;
        a.parse::<ServiceA>(&source(&[])).await.unwrap();

        let report = a
            .drift_checker()
            .check_dependencies_available(a.fields())
            .await
            .unwrap();
        assert!(!report.is_satisfied());
        let unavailable = report.unavailable();
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].identity, identity("org/c"));
        assert_eq!(unavailable[0].fields, vec!["A_UPSTREAM".to_string()]);

        let mut c = open_node(&substrate, "org/c", "C", Default::default()).await;
        c.parse::<ServiceC>(&source(&[])).await.unwrap();

        let report = a
            .drift_checker()
            .check_dependencies_available(a.fields())
            .await
            .unwrap();
        assert!(report.is_satisfied());
        assert_eq!(report.dependencies[0].instances, 1);
        assert!(report.ensure_available().is_ok());

        let consumers = c
            .drift_checker()
            .check_consumer_impact(&identity("org/c"))
            .await
            .unwrap();
        assert_eq!(consumers, vec![identity("org/a")]);

        a.close().await;
        let consumers = c
            .drift_checker()
            .check_consumer_impact(&identity("org/c"))
            .await
            .unwrap();
        assert!(consumers.is_empty());
        c.close().await;
    }

    // =========================================================================
    // SHARED DIRECTORY REGISTRY
    // =========================================================================

    #[tokio::test]
    async fn test_file_registry_shared_between_substrates() {
        let dir = TempDir::new().unwrap();
        let left_store = FileKvStore::open(dir.path()).await.unwrap();
        let right_store = FileKvStore::open(dir.path()).await.unwrap();
        let left = EmbeddedSubstrate::with_store(ServerAuthPolicy::Open, Arc::new(left_store));
        let right =
            EmbeddedSubstrate::with_store(ServerAuthPolicy::Open, Arc::new(right_store.clone()));

        let mut api = open_node(&left, "org/api", "API", Default::default()).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();

        let observer = open_node(&right, "org/observer", "OBS", Default::default()).await;
        let instances = observer
            .discovery()
            .get_service(&identity("org/api"))
            .await
            .unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(&instances[0].key(), api.key().unwrap());
        assert!(observer
            .discovery()
            .service_exists(&identity("org/api"))
            .await
            .unwrap());

        api.close().await;
        assert!(right_store.keys().await.unwrap().is_empty());
        assert!(observer
            .discovery()
            .get_all_services()
            .await
            .unwrap()
            .is_empty());
    }
}
