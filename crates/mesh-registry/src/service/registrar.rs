//! # Registration Manager
//!
//! Writes the registration record under its key with a TTL, refreshes it on
//! a fixed interval, and deletes it on deregistration.
//!
//! ## Stop Transition
//!
//! The heartbeat takes the `stopped` lock, checks the flag and writes while
//! still holding it. `deregister` sets the flag under the same lock before
//! signalling shutdown, so no heartbeat write can land after the delete.

use mesh_bus::KeyValueStore;
use mesh_types::{FieldDescriptor, InstanceInfo, RegistryKey, ServiceRegistration, SourceInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{with_timeout, DEFAULT_OP_TIMEOUT};
use crate::domain::RegistryError;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// TTL as a multiple of the heartbeat interval.
pub const TTL_MULTIPLIER: u32 = 3;

/// Registrar timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarConfig {
    pub heartbeat_interval: Duration,
    /// Must be strictly greater than `heartbeat_interval`.
    pub ttl: Duration,
    /// Timeout of each substrate round trip.
    pub op_timeout: Duration,
    /// When false the record is written once and left to expire.
    pub heartbeat_enabled: bool,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self::with_interval(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl RegistrarConfig {
    /// `interval` with the default TTL multiple and timeout.
    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            heartbeat_interval: interval,
            ttl: interval.saturating_mul(TTL_MULTIPLIER),
            op_timeout: DEFAULT_OP_TIMEOUT,
            heartbeat_enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.heartbeat_interval.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        if self.op_timeout.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "operation timeout must be non-zero".to_string(),
            ));
        }
        if self.ttl <= self.heartbeat_interval {
            return Err(RegistryError::InvalidConfig(format!(
                "ttl {:?} must exceed heartbeat interval {:?}",
                self.ttl, self.heartbeat_interval
            )));
        }
        Ok(())
    }
}

struct Lease {
    registration: Arc<ServiceRegistration>,
    key: RegistryKey,
    stopped: Arc<Mutex<bool>>,
    shutdown: watch::Sender<bool>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Owns this process's registry record.
pub struct Registrar {
    store: Arc<dyn KeyValueStore>,
    config: RegistrarConfig,
    lease: Option<Lease>,
}

impl Registrar {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RegistrarConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            lease: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    /// The live registration, if registered.
    #[must_use]
    pub fn registration(&self) -> Option<&ServiceRegistration> {
        self.lease.as_ref().map(|l| l.registration.as_ref())
    }

    #[must_use]
    pub fn key(&self) -> Option<&RegistryKey> {
        self.lease.as_ref().map(|l| &l.key)
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.lease.is_some()
    }

    /// Write the record and start the heartbeat.
    ///
    /// Fails with [`RegistryError::AlreadyRegistered`] while a previous
    /// registration is live.
    pub async fn register(
        &mut self,
        source: SourceInfo,
        instance: InstanceInfo,
        fields: Vec<FieldDescriptor>,
    ) -> Result<RegistryKey, RegistryError> {
        if let Some(lease) = &self.lease {
            return Err(RegistryError::AlreadyRegistered(lease.key.to_string()));
        }

        let registration = Arc::new(ServiceRegistration::new(source, instance, fields));
        let key = registration.key();
        let payload = registration.to_json()?;
        with_timeout(
            self.config.op_timeout,
            "register",
            key.as_str(),
            self.store.put(key.as_str(), payload, self.config.ttl),
        )
        .await?;

        info!(
            key = %key,
            fields = registration.fields.len(),
            ttl_secs = self.config.ttl.as_secs(),
            "Service registered"
        );

        let stopped = Arc::new(Mutex::new(false));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let heartbeat = self.config.heartbeat_enabled.then(|| {
            let beat = Heartbeat {
                store: Arc::clone(&self.store),
                registration: Arc::clone(&registration),
                key: key.clone(),
                config: self.config.clone(),
                stopped: Arc::clone(&stopped),
            };
            let first_tick = Instant::now() + self.config.heartbeat_interval;
            tokio::spawn(beat.run(first_tick, shutdown_rx))
        });

        self.lease = Some(Lease {
            registration,
            key: key.clone(),
            stopped,
            shutdown,
            heartbeat,
        });
        Ok(key)
    }

    /// Stop the heartbeat, then delete the record.
    ///
    /// A delete failure is returned but leaves the registrar deregistered:
    /// the TTL reclaims the key. No-op when not registered.
    pub async fn deregister(&mut self) -> Result<(), RegistryError> {
        let Some(mut lease) = self.lease.take() else {
            return Ok(());
        };

        *lease.stopped.lock().await = true;
        let _ = lease.shutdown.send(true);
        if let Some(task) = lease.heartbeat.take() {
            if let Err(e) = task.await {
                warn!(key = %lease.key, error = %e, "Heartbeat task ended abnormally");
            }
        }

        let result = with_timeout(
            self.config.op_timeout,
            "deregister",
            lease.key.as_str(),
            self.store.delete(lease.key.as_str()),
        )
        .await;
        match &result {
            Ok(()) => info!(key = %lease.key, "Service deregistered"),
            Err(e) => warn!(key = %lease.key, error = %e, "Deregister failed, key left to expire"),
        }
        result
    }
}

struct Heartbeat {
    store: Arc<dyn KeyValueStore>,
    registration: Arc<ServiceRegistration>,
    key: RegistryKey,
    config: RegistrarConfig,
    stopped: Arc<Mutex<bool>>,
}

impl Heartbeat {
    async fn run(self, first_tick: Instant, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(first_tick, self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let stopped = self.stopped.lock().await;
            if *stopped {
                break;
            }
            let result = self.beat().await;
            drop(stopped);

            match result {
                Ok(()) => {
                    if consecutive_failures > 0 {
                        info!(
                            key = %self.key,
                            after_failures = consecutive_failures,
                            "Heartbeat recovered"
                        );
                    }
                    consecutive_failures = 0;
                    debug!(key = %self.key, "Heartbeat sent");
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(
                        key = %self.key,
                        error = %e,
                        consecutive_failures,
                        "Heartbeat failed"
                    );
                }
            }
        }
        debug!(key = %self.key, "Heartbeat stopped");
    }

    async fn beat(&self) -> Result<(), RegistryError> {
        let payload = self.registration.to_json()?;
        with_timeout(
            self.config.op_timeout,
            "heartbeat",
            self.key.as_str(),
            self.store.put(self.key.as_str(), payload, self.config.ttl),
        )
        .await
    }
}
