//! # Substrate Ports
//!
//! The traits the registry core depends on. Implementations live in this
//! crate (in-memory, directory-backed) or in a deployment-specific adapter.

use crate::errors::BusError;
use async_trait::async_trait;
use std::time::Duration;

/// Kind of change carried by a [`KvEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOperation {
    Put,
    Delete,
}

/// One change observed through a [`KeyWatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    /// `None` for deletes.
    pub value: Option<Vec<u8>>,
    pub operation: KvOperation,
}

impl KvEntry {
    #[must_use]
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            operation: KvOperation::Put,
        }
    }

    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            operation: KvOperation::Delete,
        }
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == KvOperation::Delete
    }
}

/// Key-value store with per-key expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write `value` under `key`. The entry expires `ttl` after this write
    /// unless written again; `Duration::ZERO` means no expiry.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BusError>;

    /// Current value of a live key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BusError>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BusError>;

    /// All live keys, sorted.
    async fn keys(&self) -> Result<Vec<String>, BusError>;

    /// Watch keys matching `pattern`.
    ///
    /// The watch first yields the current value of every matching live key,
    /// then every subsequent change, in the order the store applied them.
    async fn watch(&self, pattern: &str) -> Result<Box<dyn KeyWatch>, BusError>;
}

/// Stream of changes from [`KeyValueStore::watch`].
#[async_trait]
pub trait KeyWatch: Send {
    /// Next change. `None` once stopped or when the store is gone.
    async fn next(&mut self) -> Option<KvEntry>;

    /// Stop the watch. Subsequent `next` calls return `None`.
    fn stop(&mut self);
}

/// A message delivered through [`PubSub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Fire-and-forget publish/subscribe.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish to a concrete subject. Returns the number of subscriptions
    /// whose pattern matched.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<usize, BusError>;

    /// Subscribe to subjects matching `pattern`.
    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn MessageStream>, BusError>;
}

/// Stream of messages from [`PubSub::subscribe`].
#[async_trait]
pub trait MessageStream: Send {
    /// Next message. `None` once stopped or when the bus is gone.
    async fn next(&mut self) -> Option<Message>;

    /// Stop the subscription.
    fn stop(&mut self);
}
