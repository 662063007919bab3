//! # Secret Preprocessor
//!
//! Replaces every `ref+<scheme>://...` value of a [`ConfigSource`] with the
//! plaintext from the resolver registered for its scheme. Runs once, before
//! the configuration is parsed.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::{EchoResolver, FileResolver};
use crate::domain::{ConfigSource, SecretError, SecretReference};
use crate::ports::SecretResolver;

/// Scheme-dispatching secret resolution.
#[derive(Clone, Default)]
pub struct SecretPreprocessor {
    resolvers: HashMap<String, Arc<dyn SecretResolver>>,
}

impl SecretPreprocessor {
    /// No backends registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `echo` and `file` backends.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .with_resolver(Arc::new(EchoResolver))
            .with_resolver(Arc::new(FileResolver::new()))
    }

    /// Register (or replace) the backend for `resolver.scheme()`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.resolvers
            .insert(resolver.scheme().to_ascii_lowercase(), resolver);
        self
    }

    /// Registered schemes, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Resolve a single reference string.
    pub async fn resolve_value(&self, value: &str) -> Result<String, SecretError> {
        let reference: SecretReference = value.parse()?;
        let resolver = self
            .resolvers
            .get(&reference.scheme)
            .ok_or_else(|| SecretError::UnknownScheme {
                scheme: reference.scheme.clone(),
            })?;
        resolver.resolve(&reference).await
    }

    /// Return a copy of `source` with every reference resolved.
    ///
    /// All or nothing: on the first failure the error names the key and no
    /// partially resolved source is returned. Makes no resolver call when
    /// nothing needs resolving.
    pub async fn resolve(&self, source: &ConfigSource) -> Result<ConfigSource, SecretError> {
        let keys = source.reference_keys();
        if keys.is_empty() {
            return Ok(source.clone());
        }

        let count = keys.len();
        let mut resolved = source.clone();
        for key in keys {
            let Some(value) = source.get(key) else {
                continue;
            };
            let plaintext = self
                .resolve_value(value)
                .await
                .map_err(|e| SecretError::Key {
                    key: key.to_string(),
                    source: Box::new(e),
                })?;
            debug!(key, "Secret reference resolved");
            resolved.insert(key, plaintext);
        }
        info!(count, "Secret references resolved");
        Ok(resolved)
    }
}

impl std::fmt::Debug for SecretPreprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretPreprocessor")
            .field("schemes", &self.schemes())
            .finish()
    }
}
