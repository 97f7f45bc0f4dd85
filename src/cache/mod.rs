//! Read-through result cache
//!
//! [`Cache`] wraps pure read operations: a hit returns the stored result
//! without running the operation, a miss runs it and stores the serialized
//! result under a TTL. Keys are content hashes built with [`CacheKey`].
//!
//! - [`CacheStore`]: storage backend contract
//! - [`MemoryCacheStore`]: in-process TTL map
//! - `RedisCacheStore`: shared Redis store (feature `redis-cache`)
//! - [`CacheStats`]: hit/miss counters
//!
//! Concurrent misses on the same key each run the operation and each write
//! the result; there is no request coalescing. Store failures never fail a
//! request: they are logged and treated as a miss.

mod memory;
#[cfg(feature = "redis-cache")]
mod redis_store;

pub use memory::MemoryCacheStore;
#[cfg(feature = "redis-cache")]
pub use redis_store::RedisCacheStore;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Prefix shared by every key this crate writes.
pub const KEY_NAMESPACE: &str = "catalog:";

/// Builder for a stable cache key from an operation name and the arguments
/// that affect its result.
///
/// Argument order does not matter; arguments are serialized as canonical JSON
/// from a sorted map before hashing.
#[derive(Debug, Clone)]
pub struct CacheKey {
    operation: String,
    args: BTreeMap<String, serde_json::Value>,
}

impl CacheKey {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: BTreeMap::new(),
        }
    }

    /// Add an argument. Values are JSON scalars, so `1` and `"1"` hash apart.
    pub fn arg(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(name.to_string(), value.into());
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Namespaced SHA-256 hex digest of `{operation, args}`.
    pub fn digest(&self) -> String {
        let canonical = serde_json::json!({
            "operation": self.operation,
            "args": self.args,
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{}{:x}", KEY_NAMESPACE, hasher.finalize())
    }
}

/// Key/value storage with per-entry expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}

/// Counters for cache effectiveness
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Failed, timed-out or undecodable store calls
    pub store_errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache decorator around a [`CacheStore`].
///
/// Cloning is cheap and clones share the store and the statistics.
#[derive(Clone)]
pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
    timeout: Duration,
    stats: Arc<RwLock<CacheStats>>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            store: Some(store),
            ttl,
            timeout,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    /// A cache that never stores anything; every call runs the operation.
    pub fn disabled() -> Self {
        Self {
            store: None,
            ttl: Duration::ZERO,
            timeout: Duration::ZERO,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Return the cached value for `key`, or run `compute`, store its result
    /// and return it. Errors from `compute` are returned and not cached.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(store) = &self.store else {
            return compute().await;
        };

        let digest = key.digest();

        if let Some(value) = self.lookup::<T>(store.as_ref(), key, &digest).await {
            self.record(|stats| stats.hits += 1);
            tracing::debug!("Cache hit for {} ({})", key.operation(), digest);
            return Ok(value);
        }

        self.record(|stats| stats.misses += 1);
        tracing::debug!("Cache miss for {} ({})", key.operation(), digest);

        let value = compute().await?;
        self.store_value(store.as_ref(), key, &digest, &value).await;
        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        store: &dyn CacheStore,
        key: &CacheKey,
        digest: &str,
    ) -> Option<T> {
        let payload = match tokio::time::timeout(self.timeout, store.get(digest)).await {
            Ok(Ok(payload)) => payload?,
            Ok(Err(e)) => {
                self.store_failed(key, &e);
                return None;
            }
            Err(_) => {
                self.store_failed(key, &timed_out(self.timeout));
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.store_failed(key, &Error::Json(e));
                None
            }
        }
    }

    async fn store_value<T: Serialize>(
        &self,
        store: &dyn CacheStore,
        key: &CacheKey,
        digest: &str,
        value: &T,
    ) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.store_failed(key, &Error::Json(e));
                return;
            }
        };

        match tokio::time::timeout(self.timeout, store.set_with_ttl(digest, payload, self.ttl)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.store_failed(key, &e),
            Err(_) => self.store_failed(key, &timed_out(self.timeout)),
        }
    }

    fn store_failed(&self, key: &CacheKey, error: &Error) {
        self.record(|stats| stats.store_errors += 1);
        tracing::warn!(
            "Cache unavailable for {}, falling through: {}",
            key.operation(),
            error
        );
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

fn timed_out(timeout: Duration) -> Error {
    Error::CacheUnavailable(format!("timed out after {:?}", timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_cache() -> Cache {
        Cache::new(
            Arc::new(MemoryCacheStore::new()),
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_key_is_independent_of_arg_order() {
        let a = CacheKey::new("search_products")
            .arg("keyword", "camera")
            .arg("top_k", 10);
        let b = CacheKey::new("search_products")
            .arg("top_k", 10)
            .arg("keyword", "camera");
        assert_eq!(a.digest(), b.digest());
        assert!(a.digest().starts_with(KEY_NAMESPACE));
    }

    #[test]
    fn test_key_depends_on_operation_and_args() {
        let base = CacheKey::new("search_products").arg("keyword", "camera");
        let other_arg = CacheKey::new("search_products").arg("keyword", "lamp");
        let other_op = CacheKey::new("search_comments").arg("keyword", "camera");
        assert_ne!(base.digest(), other_arg.digest());
        assert_ne!(base.digest(), other_op.digest());
    }

    #[test]
    fn test_key_distinguishes_arg_types() {
        let number = CacheKey::new("recommend").arg("user_id", 1);
        let text = CacheKey::new("recommend").arg("user_id", "1");
        let flag = CacheKey::new("recommend").arg("user_id", true);
        assert_ne!(number.digest(), text.digest());
        assert_ne!(number.digest(), flag.digest());

        let unsigned = CacheKey::new("recommend").arg("user_id", 1usize);
        assert_eq!(number.digest(), unsigned.digest());
    }

    #[tokio::test]
    async fn test_hit_skips_computation() {
        let cache = memory_cache();
        let key = CacheKey::new("recommend").arg("user_id", 1);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Vec<i64> = cache
                .get_or_compute(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![30, 40])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![30, 40]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = memory_cache();
        let key = CacheKey::new("recommend").arg("user_id", 2);

        let first: Result<Vec<i64>> = cache
            .get_or_compute(&key, || async {
                Err(Error::BackendUnavailable("down".to_string()))
            })
            .await;
        assert!(first.is_err());

        let second: Vec<i64> = cache
            .get_or_compute(&key, || async { Ok(vec![1]) })
            .await
            .unwrap();
        assert_eq!(second, vec![1]);
    }

    #[tokio::test]
    async fn test_failing_store_falls_through() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .returning(|_| Err(Error::CacheUnavailable("connection refused".to_string())));
        store
            .expect_set_with_ttl()
            .returning(|_, _, _| Err(Error::CacheUnavailable("connection refused".to_string())));

        let cache = Cache::new(
            Arc::new(store),
            Duration::from_secs(60),
            Duration::from_millis(500),
        );
        let key = CacheKey::new("search_products").arg("keyword", "camera");

        let value: Vec<i64> = cache
            .get_or_compute(&key, || async { Ok(vec![1, 2]) })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2]);
        assert_eq!(cache.stats().store_errors, 2);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        let key = CacheKey::new("recommend").arg("user_id", 3);
        store
            .set_with_ttl(&key.digest(), "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let cache = Cache::new(store, Duration::from_secs(60), Duration::from_millis(500));
        let value: Vec<i64> = cache
            .get_or_compute(&key, || async { Ok(vec![7]) })
            .await
            .unwrap();
        assert_eq!(value, vec![7]);
        assert_eq!(cache.stats().store_errors, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let cache = Cache::disabled();
        let key = CacheKey::new("recommend").arg("user_id", 1);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Vec<i64> = cache
                .get_or_compute(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::new())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_enabled());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
