//! # In-Memory Key-Value Store
//!
//! TTL store backed by a `BTreeMap`, with change fan-out over a
//! `tokio::sync::broadcast` channel.
//!
//! ## Expiry
//!
//! - Expired entries are invisible to reads immediately (lazy check).
//! - Expired entries are garbage-collected on write, at most once per
//!   `gc_interval`.
//! - Expiry emits no watch event: observers detect it by absence.
//!
//! ## Lagging Watches
//!
//! A watch that falls more than the channel capacity behind resubscribes and
//! replays the current matching entries, plus a delete for every key it had
//! reported that is no longer stored. Consumers converge on the store's state
//! instead of silently missing the dropped changes.
//!
//! All time is read from `tokio::time::Instant`, so paused-clock tests
//! drive expiry deterministically.

use crate::errors::BusError;
use crate::ports::{KeyValueStore, KeyWatch, KvEntry, KvOperation};
use crate::subject;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default interval between expired-entry sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

struct State {
    entries: BTreeMap<String, StoredValue>,
    last_gc: Instant,
}

impl State {
    fn garbage_collect(&mut self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, v| v.is_live(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Expired entries collected");
        }
        self.last_gc = now;
    }

    fn matching(&self, pattern: &str, now: Instant) -> VecDeque<KvEntry> {
        self.entries
            .iter()
            .filter(|(k, v)| v.is_live(now) && subject::matches(pattern, k))
            .map(|(k, v)| KvEntry::put(k.clone(), v.value.clone()))
            .collect()
    }
}

/// In-process TTL key-value store.
#[derive(Clone)]
pub struct InMemoryKvStore {
    state: Arc<Mutex<State>>,
    sender: broadcast::Sender<KvEntry>,
    gc_interval: Duration,
}

impl InMemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CHANNEL_CAPACITY, DEFAULT_GC_INTERVAL)
    }

    /// Custom watcher buffer and sweep interval.
    #[must_use]
    pub fn with_config(capacity: usize, gc_interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(State {
                entries: BTreeMap::new(),
                last_gc: Instant::now(),
            })),
            sender,
            gc_interval,
        }
    }

    /// Number of stored entries, including expired ones not yet collected.
    #[must_use]
    pub fn stored_len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Number of active watches.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BusError> {
        subject::validate_key(key)?;
        let now = Instant::now();
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(now.checked_add(ttl).ok_or(BusError::InvalidTtl(ttl))?)
        };

        let mut state = self.state.lock();
        if now.saturating_duration_since(state.last_gc) >= self.gc_interval {
            state.garbage_collect(now);
        }
        state.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.clone(),
                expires_at,
            },
        );
        // Sent under the lock so watchers see changes in apply order.
        let _ = self.sender.send(KvEntry::put(key, value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BusError> {
        subject::validate_key(key)?;
        let now = Instant::now();
        let state = self.state.lock();
        Ok(state
            .entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), BusError> {
        subject::validate_key(key)?;
        let mut state = self.state.lock();
        if state.entries.remove(key).is_some() {
            let _ = self.sender.send(KvEntry::delete(key));
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BusError> {
        let now = Instant::now();
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .filter(|(_, v)| v.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn watch(&self, pattern: &str) -> Result<Box<dyn KeyWatch>, BusError> {
        subject::validate_pattern(pattern)?;
        let now = Instant::now();

        // Subscribe and snapshot under the same lock: no gap, no duplicate.
        let state = self.state.lock();
        let receiver = self.sender.subscribe();
        let initial = state.matching(pattern, now);
        drop(state);

        debug!(pattern, initial = initial.len(), "Watch started");
        Ok(Box::new(MemoryWatch {
            pattern: pattern.to_string(),
            pending: initial,
            reported: BTreeSet::new(),
            receiver: Some(receiver),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryWatch {
    pattern: String,
    pending: VecDeque<KvEntry>,
    /// Keys whose last delivered event was a put.
    reported: BTreeSet<String>,
    receiver: Option<broadcast::Receiver<KvEntry>>,
    state: Arc<Mutex<State>>,
}

impl MemoryWatch {
    fn deliver(&mut self, entry: KvEntry) -> KvEntry {
        match entry.operation {
            KvOperation::Put => {
                self.reported.insert(entry.key.clone());
            }
            KvOperation::Delete => {
                self.reported.remove(&entry.key);
            }
        }
        entry
    }

    /// Replace the lagged receiver and queue the current state in its place.
    fn resync(&mut self) {
        let state = self.state.lock();
        // Writers send under this lock, so the new receiver starts exactly
        // where the snapshot ends.
        self.receiver = self.receiver.as_ref().map(broadcast::Receiver::resubscribe);
        self.pending = state.matching(&self.pattern, Instant::now());
        for key in &self.reported {
            if !state.entries.contains_key(key) {
                self.pending.push_back(KvEntry::delete(key.clone()));
            }
        }
    }
}

#[async_trait]
impl KeyWatch for MemoryWatch {
    async fn next(&mut self) -> Option<KvEntry> {
        loop {
            self.receiver.as_ref()?;
            if let Some(entry) = self.pending.pop_front() {
                return Some(self.deliver(entry));
            }
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(entry) if subject::matches(&self.pattern, &entry.key) => {
                    return Some(self.deliver(entry));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        pattern = %self.pattern,
                        skipped,
                        "Watch lagged, replaying current state"
                    );
                    self.resync();
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn stop(&mut self) {
        self.pending.clear();
        self.receiver = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryKvStore::new();
        store.put("a.b.c", b"v1".to_vec(), TTL).await.unwrap();
        assert_eq!(store.get("a.b.c").await.unwrap(), Some(b"v1".to_vec()));

        store.delete("a.b.c").await.unwrap();
        assert_eq!(store.get("a.b.c").await.unwrap(), None);
        // Absent key
        store.delete("a.b.c").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = InMemoryKvStore::new();
        assert!(matches!(
            store.put("a.*", vec![], TTL).await,
            Err(BusError::InvalidKey { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_and_refresh() {
        let store = InMemoryKvStore::new();
        store.put("a.b.c", b"v".to_vec(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        store.put("a.b.c", b"v".to_vec(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.get("a.b.c").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("a.b.c").await.unwrap().is_none());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let store = InMemoryKvStore::new();
        store.put("a.b", vec![1], Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(store.get("a.b").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_on_write() {
        let store = InMemoryKvStore::with_config(16, Duration::from_secs(5));
        store.put("a.old", vec![], Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        store.put("a.new", vec![], TTL).await.unwrap();
        assert_eq!(store.stored_len(), 1);
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = InMemoryKvStore::new();
        for key in ["b.x", "a.y", "a.x"] {
            store.put(key, vec![], TTL).await.unwrap();
        }
        assert_eq!(store.keys().await.unwrap(), vec!["a.x", "a.y", "b.x"]);
    }

    #[tokio::test]
    async fn test_watch_replays_then_streams() {
        let store = InMemoryKvStore::new();
        store.put("acme.api.1", b"one".to_vec(), TTL).await.unwrap();
        store.put("acme.web.1", b"web".to_vec(), TTL).await.unwrap();

        let mut watch = store.watch("acme.api.*").await.unwrap();
        store.put("acme.api.2", b"two".to_vec(), TTL).await.unwrap();
        store.put("acme.web.2", b"skip".to_vec(), TTL).await.unwrap();
        store.delete("acme.api.1").await.unwrap();

        let first = watch.next().await.unwrap();
        assert_eq!(first, KvEntry::put("acme.api.1", b"one".to_vec()));
        let second = watch.next().await.unwrap();
        assert_eq!(second.key, "acme.api.2");
        let third = watch.next().await.unwrap();
        assert_eq!(third.operation, KvOperation::Delete);
        assert_eq!(third.key, "acme.api.1");
    }

    #[tokio::test]
    async fn test_stopped_watch_yields_nothing() {
        let store = InMemoryKvStore::new();
        store.put("a.b", vec![], TTL).await.unwrap();
        let mut watch = store.watch(">").await.unwrap();
        assert_eq!(store.watcher_count(), 1);

        watch.stop();
        assert_eq!(store.watcher_count(), 0);
        store.put("a.c", vec![], TTL).await.unwrap();
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lagged_watch_converges_on_current_state() {
        let store = InMemoryKvStore::with_config(2, DEFAULT_GC_INTERVAL);
        store.put("acme.api.1", b"one".to_vec(), TTL).await.unwrap();
        let mut watch = store.watch("acme.api.*").await.unwrap();
        assert_eq!(
            watch.next().await.unwrap(),
            KvEntry::put("acme.api.1", b"one".to_vec())
        );

        // Far more changes than the channel holds while nobody reads.
        for i in 2..10 {
            store
                .put(&format!("acme.api.{i}"), vec![i], TTL)
                .await
                .unwrap();
        }
        store.delete("acme.api.1").await.unwrap();
        store.put("acme.api.9", b"final".to_vec(), TTL).await.unwrap();

        let mut view: BTreeMap<String, Vec<u8>> =
            BTreeMap::from([("acme.api.1".to_string(), b"one".to_vec())]);
        while view.len() != 8 || view.contains_key("acme.api.1") {
            let entry = tokio::time::timeout(Duration::from_secs(1), watch.next())
                .await
                .unwrap()
                .unwrap();
            match entry.operation {
                KvOperation::Put => {
                    view.insert(entry.key, entry.value.unwrap());
                }
                KvOperation::Delete => {
                    view.remove(&entry.key);
                }
            }
        }
        assert_eq!(view.get("acme.api.9"), Some(&b"final".to_vec()));
        assert_eq!(view.get("acme.api.2"), Some(&vec![2]));

        // Live again after the replay.
        store.put("acme.api.10", vec![10], TTL).await.unwrap();
        assert_eq!(
            watch.next().await.unwrap(),
            KvEntry::put("acme.api.10", vec![10])
        );
    }
}
