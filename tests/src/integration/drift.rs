//! # Drift Scenarios
//!
//! A deployed `org/api` against a pull request that drops `API_OLD_FLAG` and
//! adds a required `API_NEW_FEATURE`, checked the way CI runs it.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use mesh_bus::{EmbeddedSubstrate, InMemoryKvStore, KeyValueStore};
    use mesh_registry::{diff, extract_fields, has_breaking, DriftKind};
    use mesh_types::ServerAuthPolicy;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use wellknown_check::{load_fields, Checker};

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    fn shared_store() -> (Arc<InMemoryKvStore>, EmbeddedSubstrate) {
        let store = Arc::new(InMemoryKvStore::new());
        let substrate = EmbeddedSubstrate::with_store(
            ServerAuthPolicy::Open,
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );
        (store, substrate)
    }

    fn checker(store: &Arc<InMemoryKvStore>) -> Checker {
        Checker::new(
            Arc::clone(store) as Arc<dyn KeyValueStore>,
            Duration::from_secs(5),
        )
    }

    fn report(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    // =========================================================================
    // PURE DIFF
    // =========================================================================

    #[test]
    fn test_pull_request_drift() {
        let current = extract_fields::<ApiV1>("API").unwrap();
        let candidate = extract_fields::<ApiV2>("API").unwrap();
        let entries = diff(&current, &candidate);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, DriftKind::Removed);
        assert_eq!(entries[0].field, "API_OLD_FLAG");
        assert!(!entries[0].breaking);
        assert_eq!(entries[1].kind, DriftKind::Added);
        assert_eq!(entries[1].field, "API_NEW_FEATURE");
        assert!(entries[1].breaking);
        assert!(has_breaking(&entries));

        assert!(diff(&current, &current).is_empty());
    }

    // =========================================================================
    // CI CHECKS OVER A LIVE REGISTRY
    // =========================================================================

    #[tokio::test]
    async fn test_self_check_against_live_registration() {
        let (store, substrate) = shared_store();
        let mut api = open_node(&substrate, "org/api", "API", Default::default()).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();

        let checker = checker(&store);
        let current = checker.current(None, Some(&identity("org/api"))).await.unwrap();
        assert_eq!(current.fields, api.fields());

        let candidate = extract_fields::<ApiV2>("API").unwrap();
        let mut out = Vec::new();
        let passed = checker
            .self_check(&current, Some(&candidate), false, &mut out)
            .unwrap();
        let text = report(out);
        assert!(!passed);
        assert!(text.contains("Service: org/api"));
        assert!(text.contains("Changes from PR:"));
        assert!(text.contains("- API_OLD_FLAG: removed"));
        assert!(text.contains("+ API_NEW_FEATURE: added (string, required) [BREAKING]"));
        assert!(text.contains("1 breaking change(s)"));

        let mut out = Vec::new();
        assert!(checker
            .self_check(&current, Some(&candidate), true, &mut out)
            .unwrap());
        assert!(report(out).contains("allowed by --allow-breaking"));

        api.close().await;
        assert!(checker
            .current(None, Some(&identity("org/api")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_check_deps_and_consumers() {
        let (store, substrate) = shared_store();
        let mut api = open_node(&substrate, "org/api", "API", Default::default()).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();
        let checker = checker(&store);

        let mut out = Vec::new();
        assert!(!checker.check_deps(api.fields(), &mut out).await.unwrap());
        assert!(report(out).contains("✗ org/billing: not found (needed by API_BILLING)"));

        let mut billing = open_node(&substrate, "org/billing", "BILLING", Default::default()).await;
        billing.parse::<Billing>(&source(&[])).await.unwrap();

        let mut out = Vec::new();
        assert!(checker.check_deps(api.fields(), &mut out).await.unwrap());
        assert!(report(out).contains("✓ org/billing: available (1 instance(s))"));

        let mut out = Vec::new();
        assert!(checker
            .check_consumers(&identity("org/billing"), &mut out)
            .await
            .unwrap());
        let text = report(out);
        assert!(text.contains("• org/api depends on this service"));
        assert!(text.contains("1 service(s) depend on org/billing"));

        api.close().await;
        billing.close().await;
    }

    // =========================================================================
    // FILE SCHEMAS
    // =========================================================================

    #[tokio::test]
    async fn test_self_check_from_files() {
        let (store, substrate) = shared_store();
        let mut api = open_node(&substrate, "org/api", "API", Default::default()).await;
        api.parse::<ApiV1>(&api_env()).await.unwrap();

        let dir = TempDir::new().unwrap();
        let current_path = dir.path().join("current.json");
        let pr_path = dir.path().join("pr.json");
        let registration = api.registration().unwrap();
        std::fs::write(&current_path, registration.to_json_pretty().unwrap()).unwrap();
        let candidate = extract_fields::<ApiV2>("API").unwrap();
        std::fs::write(&pr_path, serde_json::to_vec(&candidate).unwrap()).unwrap();
        api.close().await;

        // The registry is empty now; both sides come from disk.
        let checker = checker(&store);
        let current = checker
            .current(Some(&current_path), Some(&identity("org/api-next")))
            .await
            .unwrap();
        assert_eq!(current.identity(), &identity("org/api-next"));

        let loaded = load_fields(&pr_path).unwrap();
        assert_eq!(loaded, candidate);
        let mut out = Vec::new();
        assert!(!checker
            .self_check(&current, Some(&loaded), false, &mut out)
            .unwrap());
        assert!(report(out).contains("Service: org/api-next"));

        // A full registration works as the candidate too.
        assert_eq!(load_fields(&current_path).unwrap(), current.fields);
    }
}
