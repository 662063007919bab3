//! # Discovery Watcher
//!
//! Watches and point-in-time reads over the registry.
//!
//! Every watch runs on its own background task and returns a
//! [`WatchHandle`]. Malformed records are skipped per entry.

use async_trait::async_trait;
use mesh_bus::{KeyValueStore, KvEntry};
use mesh_types::{RegistryKey, ServiceIdentity, ServiceRegistration};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{spawn_listener, with_timeout, WatchHandle, DEFAULT_OP_TIMEOUT};
use crate::domain::RegistryError;
use crate::ports::RegistryQuery;

/// Pattern matching every registry key.
const ALL_KEYS: &str = ">";

/// A change observed on the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Updated {
        key: String,
        registration: ServiceRegistration,
    },
    Removed {
        key: String,
    },
}

impl RegistryEvent {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Updated { key, .. } | Self::Removed { key } => key,
        }
    }
}

/// Registry events drained on the caller's schedule.
#[derive(Debug)]
pub struct RegistryEventStream {
    receiver: mpsc::UnboundedReceiver<RegistryEvent>,
}

impl RegistryEventStream {
    /// Next event; `None` once the watch has stopped and the queue is empty.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        self.receiver.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Registry contents kept current by a watch.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Arc<RwLock<BTreeMap<String, ServiceRegistration>>>,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<ServiceRegistration> {
        self.entries.read().get(key).cloned()
    }

    /// Known instances of `identity`, in key order.
    #[must_use]
    pub fn instances(&self, identity: &ServiceIdentity) -> Vec<ServiceRegistration> {
        self.entries
            .read()
            .values()
            .filter(|r| r.identity() == identity)
            .cloned()
            .collect()
    }

    /// Distinct identities, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<ServiceIdentity> {
        let mut services: Vec<ServiceIdentity> = self
            .entries
            .read()
            .values()
            .map(|r| r.identity().clone())
            .collect();
        services.sort();
        services.dedup();
        services
    }

    fn apply(&self, key: &str, registration: Option<ServiceRegistration>) {
        let mut entries = self.entries.write();
        match registration {
            Some(registration) => {
                entries.insert(key.to_string(), registration);
            }
            None => {
                entries.remove(key);
            }
        }
    }
}

/// Decode a put entry; `None` for deletes and malformed payloads.
fn decode(entry: &KvEntry) -> Option<ServiceRegistration> {
    let value = entry.value.as_deref()?;
    match ServiceRegistration::from_json(value) {
        Ok(registration) => Some(registration),
        Err(e) => {
            debug!(key = %entry.key, error = %e, "Skipping malformed registration");
            None
        }
    }
}

/// Registry reads and watches.
#[derive(Clone)]
pub struct Discovery {
    store: Arc<dyn KeyValueStore>,
    op_timeout: Duration,
}

impl Discovery {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Timeout applied to each substrate round trip.
    #[must_use]
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    // =========================================================================
    // WATCHES
    // =========================================================================

    /// Invoke `callback` for every put of an instance of `identity`.
    ///
    /// Deletes are not reported. Records whose body names another identity
    /// are skipped.
    pub async fn watch_service<F>(
        &self,
        identity: &ServiceIdentity,
        mut callback: F,
    ) -> Result<WatchHandle, RegistryError>
    where
        F: FnMut(ServiceRegistration) + Send + 'static,
    {
        let pattern = identity.watch_pattern();
        let watch = with_timeout(self.op_timeout, "watch", &pattern, self.store.watch(&pattern))
            .await?;
        let identity = identity.clone();
        debug!(service = %identity, "Watching service");

        Ok(spawn_listener("watch_service", watch, move |entry: KvEntry| {
            if entry.is_delete() {
                return;
            }
            let Some(registration) = decode(&entry) else {
                return;
            };
            if registration.identity() != &identity {
                debug!(
                    key = %entry.key,
                    found = %registration.identity(),
                    "Skipping record of another service"
                );
                return;
            }
            callback(registration);
        }))
    }

    /// Invoke `callback(key, registration, deleted)` for every change of a
    /// key matching `pattern`. Deletes pass `None`.
    pub async fn watch_pattern<F>(
        &self,
        pattern: &str,
        mut callback: F,
    ) -> Result<WatchHandle, RegistryError>
    where
        F: FnMut(&str, Option<ServiceRegistration>, bool) + Send + 'static,
    {
        let watch = with_timeout(self.op_timeout, "watch", pattern, self.store.watch(pattern))
            .await?;
        debug!(pattern, "Watching registry");

        Ok(spawn_listener("watch_pattern", watch, move |entry: KvEntry| {
            if entry.is_delete() {
                callback(&entry.key, None, true);
                return;
            }
            if let Some(registration) = decode(&entry) {
                callback(&entry.key, Some(registration), false);
            }
        }))
    }

    /// [`Self::watch_pattern`] over the whole registry.
    pub async fn watch_all<F>(&self, callback: F) -> Result<WatchHandle, RegistryError>
    where
        F: FnMut(&str, Option<ServiceRegistration>, bool) + Send + 'static,
    {
        self.watch_pattern(ALL_KEYS, callback).await
    }

    /// Registry changes as a stream instead of a callback.
    pub async fn subscribe_all(
        &self,
    ) -> Result<(WatchHandle, RegistryEventStream), RegistryError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = self
            .watch_all(move |key, registration, _deleted| {
                let key = key.to_string();
                let event = match registration {
                    Some(registration) => RegistryEvent::Updated { key, registration },
                    None => RegistryEvent::Removed { key },
                };
                // Receiver gone: nobody is listening any more.
                let _ = sender.send(event);
            })
            .await?;
        Ok((handle, RegistryEventStream { receiver }))
    }

    /// A local copy of the registry kept current until the handle stops.
    pub async fn snapshot(&self) -> Result<(WatchHandle, RegistrySnapshot), RegistryError> {
        let snapshot = RegistrySnapshot::default();
        let sink = snapshot.clone();
        let handle = self
            .watch_all(move |key, registration, _deleted| sink.apply(key, registration))
            .await?;
        Ok((handle, snapshot))
    }

    // =========================================================================
    // SNAPSHOT READS
    // =========================================================================

    /// Live instances of `identity`, in key order.
    pub async fn get_service(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Vec<ServiceRegistration>, RegistryError> {
        let prefix = identity.key_prefix();
        let registrations = self.read_matching(|key| key.starts_with(&prefix)).await?;
        Ok(registrations
            .into_iter()
            .filter(|r| r.identity() == identity)
            .collect())
    }

    /// Every live instance, in key order.
    pub async fn get_all_services(&self) -> Result<Vec<ServiceRegistration>, RegistryError> {
        self.read_matching(|_| true).await
    }

    /// Whether at least one instance of `identity` is live.
    pub async fn service_exists(&self, identity: &ServiceIdentity) -> Result<bool, RegistryError> {
        Ok(!self.get_service(identity).await?.is_empty())
    }

    /// Read one instance record by key.
    pub async fn get_instance(
        &self,
        key: &RegistryKey,
    ) -> Result<Option<ServiceRegistration>, RegistryError> {
        let value = with_timeout(self.op_timeout, "get", key.as_str(), self.store.get(key.as_str()))
            .await?;
        Ok(value
            .map(|v| ServiceRegistration::from_json(&v))
            .transpose()?)
    }

    async fn read_matching(
        &self,
        include: impl Fn(&str) -> bool,
    ) -> Result<Vec<ServiceRegistration>, RegistryError> {
        let keys = with_timeout(self.op_timeout, "keys", ALL_KEYS, self.store.keys()).await?;

        let mut registrations = Vec::new();
        for key in keys.iter().filter(|k| include(k)) {
            let value =
                match with_timeout(self.op_timeout, "get", key, self.store.get(key)).await {
                    Ok(Some(value)) => value,
                    // Expired between listing and read.
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping unreadable registry entry");
                        continue;
                    }
                };
            match ServiceRegistration::from_json(&value) {
                Ok(registration) => registrations.push(registration),
                Err(e) => debug!(key = %key, error = %e, "Skipping malformed registration"),
            }
        }
        Ok(registrations)
    }
}

#[async_trait]
impl RegistryQuery for Discovery {
    async fn get_service(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Vec<ServiceRegistration>, RegistryError> {
        Discovery::get_service(self, identity).await
    }

    async fn get_all_services(&self) -> Result<Vec<ServiceRegistration>, RegistryError> {
        Discovery::get_all_services(self).await
    }
}
