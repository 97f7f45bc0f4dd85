use super::CacheStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Redis-backed store shared across service instances.
///
/// Uses a multiplexed [`ConnectionManager`] that reconnects on its own.
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect, giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                Error::CacheUnavailable(format!(
                    "redis: no connection to {} after {:?}",
                    url, timeout
                ))
            })?
            .map_err(unavailable)?;
        tracing::info!("Connected to Redis cache at {}", url);
        Ok(Self { connection })
    }
}

fn unavailable(err: redis::RedisError) -> Error {
    Error::CacheUnavailable(format!("redis: {}", err))
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        connection
            .get::<_, Option<String>>(key)
            .await
            .map_err(unavailable)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        connection
            .set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(unavailable)
    }
}
