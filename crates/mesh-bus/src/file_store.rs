//! # Directory-Backed Key-Value Store
//!
//! One file per key, shared by every process on the host that opens the same
//! directory. Writes go through a temporary file and a rename so readers never
//! see a partial entry.
//!
//! ## Entry Format
//!
//! ```text
//! <dir>/<key>.entry = { "expires_at": RFC 3339 | absent, "value": base64 }
//! ```
//!
//! Expiry is evaluated against the wall clock. Expired files are swept by
//! moving them to a hidden `.gc` name first, so a heartbeat that rewrites the
//! key mid-sweep is never lost. Watches poll the directory;
//! a key that expires or is deleted between two polls is reported as a
//! delete, and a rewrite with identical bytes is not reported.

use crate::errors::BusError;
use crate::ports::{KeyValueStore, KeyWatch, KvEntry};
use crate::subject;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

const ENTRY_EXTENSION: &str = ".entry";

/// Default watch poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default interval between expired-file sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    value: String,
}

impl StoredEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

struct Inner {
    dir: PathBuf,
    poll_interval: Duration,
    gc_interval: Duration,
    last_gc: Mutex<Instant>,
}

/// Key-value store persisted as files in a directory.
#[derive(Clone)]
pub struct FileKvStore {
    inner: Arc<Inner>,
}

impl FileKvStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, BusError> {
        Self::open_with(dir, DEFAULT_POLL_INTERVAL).await
    }

    /// Open with a custom watch poll interval.
    pub async fn open_with(
        dir: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Result<Self, BusError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BusError::io(&dir, e))?;
        debug!(dir = %dir.display(), "File store opened");
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                poll_interval,
                gc_interval: DEFAULT_GC_INTERVAL,
                last_gc: Mutex::new(Instant::now()),
            }),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.inner.dir.join(format!("{key}{ENTRY_EXTENSION}"))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<StoredEntry>, BusError> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BusError::io(path, e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| BusError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn decode_value(key: &str, entry: &StoredEntry) -> Result<Vec<u8>, BusError> {
        STANDARD.decode(&entry.value).map_err(|e| BusError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn entry_keys(&self) -> Result<Vec<String>, BusError> {
        let dir = &self.inner.dir;
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| BusError::io(dir, e))?;
        let mut keys = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| BusError::io(dir, e))?
        {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(ENTRY_EXTENSION) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Live entries matching `pattern`. Unreadable entries are skipped.
    async fn snapshot(&self, pattern: &str) -> Result<BTreeMap<String, Vec<u8>>, BusError> {
        let now = Utc::now();
        let mut live = BTreeMap::new();
        for key in self.entry_keys().await? {
            if !subject::matches(pattern, &key) {
                continue;
            }
            let value = match self.read_entry(&key).await {
                Ok(Some(entry)) if entry.is_live(now) => Self::decode_value(&key, &entry),
                Ok(_) => continue,
                Err(e) => Err(e),
            };
            match value {
                Ok(value) => {
                    live.insert(key, value);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable entry"),
            }
        }
        Ok(live)
    }

    async fn collect_expired(&self) {
        let now = Utc::now();
        let Ok(keys) = self.entry_keys().await else {
            return;
        };
        for key in keys {
            if let Ok(Some(entry)) = self.read_entry(&key).await {
                if !entry.is_live(now) {
                    match self.reap(&key).await {
                        Ok(true) => debug!(key = %key, "Expired entry collected"),
                        Ok(false) => debug!(key = %key, "Entry refreshed before collection"),
                        Err(e) => warn!(key = %key, error = %e, "Expired entry not collected"),
                    }
                }
            }
        }
    }

    /// Move `key` aside and unlink it only if the moved entry is still
    /// expired. A put that landed after the caller's expiry check is put
    /// back, unless an even newer put already took its place.
    async fn reap(&self, key: &str) -> Result<bool, BusError> {
        let path = self.path_for(key);
        let tombstone = self
            .inner
            .dir
            .join(format!(".{key}.{}.gc", Uuid::new_v4().simple()));
        match tokio::fs::rename(&path, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(BusError::io(path, e)),
        }

        let expired = match tokio::fs::read(&tombstone).await {
            Ok(raw) => serde_json::from_slice::<StoredEntry>(&raw)
                .is_ok_and(|entry| !entry.is_live(Utc::now())),
            Err(_) => false,
        };
        if !expired {
            // hard_link refuses to replace a newer entry at `path`.
            match tokio::fs::hard_link(&tombstone, &path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(_) => {
                    return tokio::fs::rename(&tombstone, &path)
                        .await
                        .map(|()| false)
                        .map_err(|e| BusError::io(path, e));
                }
            }
        }
        tokio::fs::remove_file(&tombstone)
            .await
            .map_err(|e| BusError::io(&tombstone, e))?;
        Ok(expired)
    }

    fn gc_due(&self) -> bool {
        let mut last_gc = self.inner.last_gc.lock();
        if last_gc.elapsed() >= self.inner.gc_interval {
            *last_gc = Instant::now();
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BusError> {
        subject::validate_key(key)?;
        if self.gc_due() {
            self.collect_expired().await;
        }

        let expires_at = if ttl.is_zero() {
            None
        } else {
            let ttl = chrono::Duration::from_std(ttl).map_err(|_| BusError::InvalidTtl(ttl))?;
            Some(Utc::now() + ttl)
        };
        let entry = StoredEntry {
            expires_at,
            value: STANDARD.encode(&value),
        };
        let encoded = serde_json::to_vec(&entry).map_err(|e| BusError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let tmp = self.inner.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|e| BusError::io(&tmp, e))?;
        let path = self.path_for(key);
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BusError::io(path, e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BusError> {
        subject::validate_key(key)?;
        match self.read_entry(key).await? {
            Some(entry) if entry.is_live(Utc::now()) => Self::decode_value(key, &entry).map(Some),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BusError> {
        subject::validate_key(key)?;
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BusError::io(path, e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, BusError> {
        Ok(self.snapshot(">").await?.into_keys().collect())
    }

    async fn watch(&self, pattern: &str) -> Result<Box<dyn KeyWatch>, BusError> {
        subject::validate_pattern(pattern)?;
        let known = self.snapshot(pattern).await?;
        let pending = known
            .iter()
            .map(|(k, v)| KvEntry::put(k.clone(), v.clone()))
            .collect();
        Ok(Box::new(PollingWatch {
            store: self.clone(),
            pattern: pattern.to_string(),
            known,
            pending,
            stopped: false,
        }))
    }
}

struct PollingWatch {
    store: FileKvStore,
    pattern: String,
    known: BTreeMap<String, Vec<u8>>,
    pending: VecDeque<KvEntry>,
    stopped: bool,
}

impl PollingWatch {
    fn record_changes(&mut self, current: BTreeMap<String, Vec<u8>>) {
        for (key, value) in &current {
            if self.known.get(key) != Some(value) {
                self.pending.push_back(KvEntry::put(key.clone(), value.clone()));
            }
        }
        for key in self.known.keys() {
            if !current.contains_key(key) {
                self.pending.push_back(KvEntry::delete(key.clone()));
            }
        }
        self.known = current;
    }
}

#[async_trait]
impl KeyWatch for PollingWatch {
    async fn next(&mut self) -> Option<KvEntry> {
        loop {
            if self.stopped {
                return None;
            }
            if let Some(entry) = self.pending.pop_front() {
                return Some(entry);
            }
            tokio::time::sleep(self.store.inner.poll_interval).await;
            match self.store.snapshot(&self.pattern).await {
                Ok(current) => self.record_changes(current),
                Err(e) => warn!(pattern = %self.pattern, error = %e, "Watch poll failed"),
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.pending.clear();
    }
}
