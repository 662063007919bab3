//! Service Layer
//!
//! Orchestrates the domain logic over the substrate ports:
//!
//! - `Registrar` - register, heartbeat, deregister
//! - `Discovery` - watches and snapshot reads
//! - `DriftChecker` - dependency availability and consumer impact
//! - `SecretPreprocessor` - resolve secret references before parsing
//! - rotation notifications

pub mod discovery;
pub mod drift;
pub mod registrar;
pub mod rotation;
pub mod secrets;

pub use discovery::{Discovery, RegistryEvent, RegistryEventStream, RegistrySnapshot};
pub use drift::{DependencyReport, DependencyStatus, DriftChecker};
pub use registrar::{Registrar, RegistrarConfig, DEFAULT_HEARTBEAT_INTERVAL, TTL_MULTIPLIER};
pub use rotation::{on_rotate, publish_rotation, ROTATION_SUBJECT_PREFIX};
pub use secrets::SecretPreprocessor;

use async_trait::async_trait;
use mesh_bus::{BusError, KeyWatch, KvEntry, Message, MessageStream};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::RegistryError;

/// Default timeout for a single substrate round trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one substrate round trip under `timeout`, tagging failures with the
/// operation and key.
pub(crate) async fn with_timeout<T, F>(
    timeout: Duration,
    op: &'static str,
    key: &str,
    fut: F,
) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, BusError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(RegistryError::Store {
            op,
            key: key.to_string(),
            source,
        }),
        Err(_) => Err(RegistryError::Timeout {
            op,
            key: key.to_string(),
            timeout,
        }),
    }
}

// =============================================================================
// BACKGROUND LISTENERS
// =============================================================================

/// Handle to one background listener.
///
/// Dropping the handle signals the listener to stop without waiting for it.
#[derive(Debug)]
pub struct WatchHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop the listener and wait for it to exit.
    ///
    /// No callback starts after this returns. A callback already running is
    /// allowed to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Listener task ended abnormally");
            }
        }
    }

    /// Whether the listener has exited (stopped or source closed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// A stream of events a listener drains.
#[async_trait]
pub(crate) trait EventSource: Send + 'static {
    type Item: Send;

    async fn next_event(&mut self) -> Option<Self::Item>;

    fn close(&mut self);
}

#[async_trait]
impl EventSource for Box<dyn KeyWatch> {
    type Item = KvEntry;

    async fn next_event(&mut self) -> Option<KvEntry> {
        (**self).next().await
    }

    fn close(&mut self) {
        (**self).stop();
    }
}

#[async_trait]
impl EventSource for Box<dyn MessageStream> {
    type Item = Message;

    async fn next_event(&mut self) -> Option<Message> {
        (**self).next().await
    }

    fn close(&mut self) {
        (**self).stop();
    }
}

/// Spawn a listener that feeds every event of `source` to `handler` until
/// stopped or the source closes.
pub(crate) fn spawn_listener<S, F>(name: &'static str, mut source: S, mut handler: F) -> WatchHandle
where
    S: EventSource,
    F: FnMut(S::Item) + Send + 'static,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = source.next_event() => match event {
                    Some(item) => handler(item),
                    None => {
                        debug!(listener = name, "Source closed");
                        break;
                    }
                },
            }
        }
        source.close();
        debug!(listener = name, "Listener stopped");
    });
    WatchHandle {
        shutdown,
        task: Some(task),
    }
}
