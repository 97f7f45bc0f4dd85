use super::CacheStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Writes between sweeps of expired entries.
pub const DEFAULT_PURGE_INTERVAL: usize = 256;

/// In-process TTL map
///
/// Expired entries are dropped lazily on read, and swept in bulk every
/// `purge_interval` writes so keys that are never read again do not pile up.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
    writes: AtomicUsize,
    purge_interval: usize,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired entries on every `interval`th write (at least 1).
    pub fn with_purge_interval(interval: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            purge_interval: interval.max(1),
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let now = Instant::now();
        retain_live(&mut entries, now)
    }
}

fn retain_live(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before - entries.len()
}

fn poisoned() -> Error {
    Error::CacheUnavailable("memory cache lock poisoned".to_string())
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if writes % self.purge_interval == 0 {
            let purged = retain_live(&mut entries, now);
            if purged > 0 {
                tracing::debug!("Purged {} expired cache entries", purged);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}
