//! L2 response cache: validated payloads keyed by request digest.
//!
//! In-memory map with JSON persistence. Writes go to disk every
//! `SAVE_INTERVAL` insertions and on `flush()`; a crash loses at most the last
//! few entries, which only costs repeat remote calls. Expired entries are
//! treated as absent on read and removed eagerly.

use crate::errors::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

const SAVE_INTERVAL: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEntry {
    /// Creation time, seconds since the unix epoch.
    timestamp: f64,
    response: Value,
    model: String,
}

struct Inner {
    entries: HashMap<String, CachedEntry>,
    inserts_since_save: u64,
}

pub struct ResponseCache {
    path: Option<PathBuf>,
    expiry: Duration,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    /// Open a file-backed cache, loading any existing entries. An unreadable
    /// or corrupt file degrades to an empty cache with a warning: a cold cache
    /// is a cost, not an error.
    pub fn open(path: PathBuf, expiry: Duration) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, CachedEntry>>(&text) {
                Ok(map) => {
                    tracing::debug!(entries = map.len(), path = %path.display(), "loaded response cache");
                    map
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "response cache unreadable, starting cold");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            expiry,
            inner: Mutex::new(Inner {
                entries,
                inserts_since_save: 0,
            }),
        }
    }

    /// Purely in-memory cache, used by tests and `--refresh` runs.
    pub fn in_memory(expiry: Duration) -> Self {
        Self {
            path: None,
            expiry,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                inserts_since_save: 0,
            }),
        }
    }

    /// Look up a payload. Returns `None` both when no entry exists and when
    /// the entry has outlived the expiry window; a stale entry is removed on
    /// the spot.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.entries.get(key) {
            Some(entry) => crate::model::unix_now_secs() - entry.timestamp >= self.expiry.as_secs_f64(),
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            tracing::debug!(key, "response cache entry expired, removed");
            return None;
        }
        inner.entries.get(key).map(|e| e.response.clone())
    }

    /// Insert a validated payload. A later insert for the same key overwrites;
    /// entries for an identical key are semantically interchangeable, so last
    /// writer wins is safe.
    pub fn put(&self, key: &str, payload: Value, model: &str) {
        self.put_at(key, payload, model, crate::model::unix_now_secs());
    }

    pub(crate) fn put_at(&self, key: &str, payload: Value, model: &str, timestamp: f64) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.entries.insert(
                key.to_string(),
                CachedEntry {
                    timestamp,
                    response: payload,
                    model: model.to_string(),
                },
            );
            inner.inserts_since_save += 1;
            if inner.inserts_since_save >= SAVE_INTERVAL {
                inner.inserts_since_save = 0;
                Some(inner.entries.clone())
            } else {
                None
            }
        };
        if let Some(entries) = snapshot {
            self.persist(&entries);
        }
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = crate::model::unix_now_secs();
        let horizon = self.expiry.as_secs_f64();
        let (removed, snapshot) = {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.entries.len();
            inner.entries.retain(|_, e| now - e.timestamp < horizon);
            let removed = before - inner.entries.len();
            let snapshot = (removed > 0).then(|| inner.entries.clone());
            (removed, snapshot)
        };
        if let Some(entries) = snapshot {
            self.persist(&entries);
            tracing::info!(removed, "removed expired response cache entries");
        }
        removed
    }

    /// Write the current contents to disk. Called before shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        let (path, entries) = {
            let inner = self.inner.lock().unwrap();
            match &self.path {
                Some(p) => (p.clone(), inner.entries.clone()),
                None => return Ok(()),
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string(&entries)?;
        std::fs::write(&path, text)?;
        tracing::debug!(entries = entries.len(), path = %path.display(), "flushed response cache");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &HashMap<String, CachedEntry>) {
        let Some(path) = &self.path else { return };
        let write = || -> Result<(), StoreError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string(entries)?)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist response cache");
        }
    }
}
