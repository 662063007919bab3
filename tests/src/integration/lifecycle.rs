//! # Lifecycle Scenarios
//!
//! One process from auth selection to shutdown, per auth mode.
//!
//! ```text
//! AuthConfigurator ─▶ server policy ─▶ EmbeddedSubstrate
//!        └──────────▶ client creds ──▶ connect ─▶ MeshManager::parse ─▶ close
//! ```

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use mesh_bus::{BusError, EmbeddedSubstrate, KeyValueStore};
    use mesh_node::{AuthConfigurator, AuthError, ManagerError};
    use mesh_registry::{ConfigSource, SecretError};
    use mesh_types::{AuthMode, ClientCredentials, Redacted, ServerAuthPolicy};
    use tempfile::TempDir;

    async fn run_lifecycle(auth: &AuthConfigurator) {
        let (substrate, mut manager) = open_authenticated(auth, "org/api", "API").await;
        let resolved = manager.parse::<ApiV1>(&api_env()).await.unwrap();
        assert_eq!(resolved.get("API_DB_PASSWORD"), Some("hunter2"));
        assert_eq!(resolved.get("API_DB_PORT"), Some("5432"));

        let key = manager.key().unwrap().clone();
        let observer = substrate
            .connect(&auth.client_credentials().unwrap())
            .await
            .unwrap();
        let stored = observer.kv().get(key.as_str()).await.unwrap().unwrap();
        let registration = mesh_types::ServiceRegistration::from_json(&stored).unwrap();
        assert_eq!(registration.identity(), &identity("org/api"));
        assert_eq!(registration.fields.len(), 5);
        assert!(registration.fields[0].secret);

        manager.close().await;
        assert!(observer.kv().get(key.as_str()).await.unwrap().is_none());
    }

    // =========================================================================
    // PER-MODE LIFECYCLE
    // =========================================================================

    #[tokio::test]
    async fn test_lifecycle_open() {
        let dir = TempDir::new().unwrap();
        let auth = AuthConfigurator::from_source(dir.path(), &ConfigSource::new()).unwrap();
        assert_eq!(auth.mode(), AuthMode::None);
        run_lifecycle(&auth).await;
    }

    #[tokio::test]
    async fn test_lifecycle_token() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mode"), "token").unwrap();
        std::fs::write(dir.path().join("token"), "t0ken").unwrap();
        let auth = AuthConfigurator::from_source(dir.path(), &ConfigSource::new()).unwrap();
        run_lifecycle(&auth).await;
    }

    #[tokio::test]
    async fn test_lifecycle_keypair() {
        let dir = TempDir::new().unwrap();
        write_keypair(dir.path(), [3u8; 32]);
        let auth =
            AuthConfigurator::from_source(dir.path(), &source(&[("MESH_AUTH", "nkey")])).unwrap();
        assert_eq!(auth.mode(), AuthMode::KeyPair);
        run_lifecycle(&auth).await;
    }

    // =========================================================================
    // FATAL STARTUP CONDITIONS
    // =========================================================================

    #[tokio::test]
    async fn test_wrong_token_rejected() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Token(Redacted::new("right")));
        let result = substrate
            .connect(&ClientCredentials::Token(Redacted::new("wrong")))
            .await;
        assert!(matches!(result, Err(BusError::Unauthorized(_))));

        let result = substrate.connect(&ClientCredentials::None).await;
        assert!(matches!(result, Err(BusError::Unauthorized(_))));
    }

    #[test]
    fn test_missing_material_never_downgrades() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mode"), "keypair").unwrap();
        let auth = AuthConfigurator::from_source(dir.path(), &ConfigSource::new()).unwrap();
        assert_eq!(auth.mode(), AuthMode::KeyPair);
        assert!(matches!(auth.server_policy(), Err(AuthError::Missing { .. })));
        assert!(matches!(auth.client_credentials(), Err(AuthError::Missing { .. })));
    }

    #[tokio::test]
    async fn test_unresolved_secret_registers_nothing() {
        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let mut manager = open_node(&substrate, "org/api", "API", Default::default()).await;
        let env = source(&[("API_DB_PASSWORD", "ref+file:///nonexistent/secret")]);

        match manager.parse::<ApiV1>(&env).await {
            Err(ManagerError::Secret(SecretError::Key { key, .. })) => {
                assert_eq!(key, "API_DB_PASSWORD");
            }
            other => panic!("unexpected {other:?}"),
        }
        let observer = substrate.connect(&ClientCredentials::None).await.unwrap();
        assert!(observer.kv().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_secret_resolved_before_parse() {
        let secrets = TempDir::new().unwrap();
        let path = secrets.path().join("db.json");
        std::fs::write(&path, r#"{"password":"from-file"}"#).unwrap();
        let reference = format!("ref+file://{}#/password", path.display());

        let substrate = EmbeddedSubstrate::start(ServerAuthPolicy::Open);
        let mut manager = open_node(&substrate, "org/api", "API", Default::default()).await;
        let resolved = manager
            .parse::<ApiV1>(&source(&[("API_DB_PASSWORD", reference.as_str())]))
            .await
            .unwrap();
        assert_eq!(resolved.get("API_DB_PASSWORD"), Some("from-file"));
        manager.close().await;
    }
}
