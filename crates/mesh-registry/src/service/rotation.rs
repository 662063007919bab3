//! # Secret Rotation Notifications
//!
//! A rotation is announced on `secrets.rotated.<path>` with an empty
//! payload. Subscribers treat any delivery as "re-resolve and maybe restart".

use mesh_bus::{Message, PubSub};
use tracing::{debug, info};

use super::{spawn_listener, WatchHandle};
use crate::domain::RegistryError;

/// Subject prefix of rotation notifications.
pub const ROTATION_SUBJECT_PREFIX: &str = "secrets.rotated.";

/// Wildcard subscription covering every rotation subject.
const ROTATION_PATTERN: &str = "secrets.rotated.>";

/// Announce that the secret at `path` rotated. Returns the number of
/// subscribers reached.
pub async fn publish_rotation(bus: &dyn PubSub, path: &str) -> Result<usize, RegistryError> {
    let subject = format!("{ROTATION_SUBJECT_PREFIX}{path}");
    let delivered = bus
        .publish(&subject, Vec::new())
        .await
        .map_err(|source| RegistryError::Store {
            op: "publish",
            key: subject.clone(),
            source,
        })?;
    info!(subject = %subject, delivered, "Secret rotation published");
    Ok(delivered)
}

/// Call `handler(path)` for every rotation notification.
pub async fn on_rotate<F>(bus: &dyn PubSub, mut handler: F) -> Result<WatchHandle, RegistryError>
where
    F: FnMut(String) + Send + 'static,
{
    let stream = bus
        .subscribe(ROTATION_PATTERN)
        .await
        .map_err(|source| RegistryError::Store {
            op: "subscribe",
            key: ROTATION_PATTERN.to_string(),
            source,
        })?;
    debug!(pattern = ROTATION_PATTERN, "Listening for secret rotations");

    Ok(spawn_listener("on_rotate", stream, move |message: Message| {
        if let Some(path) = message.subject.strip_prefix(ROTATION_SUBJECT_PREFIX) {
            handler(path.to_string());
        }
    }))
}
