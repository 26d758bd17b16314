//! Redis cache invalidator.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument};

use crate::domain::{AppError, CacheError, CacheInvalidator};

/// Keys removed per `DEL` round trip.
const DELETE_BATCH: usize = 500;

/// Evicts key namespaces from Redis with `SCAN MATCH` + `DEL`.
pub struct RedisCacheInvalidator {
    manager: ConnectionManager,
}

impl RedisCacheInvalidator {
    /// Connects to Redis; the manager reconnects on its own after drops.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, AppError> {
        info!("Connecting to Redis...");
        let client = redis::Client::open(redis_url.expose_secret())
            .map_err(|e| AppError::Cache(CacheError::Connection(e.to_string())))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Cache(CacheError::Connection(e.to_string())))?;
        info!("Connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheInvalidator for RedisCacheInvalidator {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Cache(CacheError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_keys_matching(&self, pattern: &str) -> Result<u64, AppError> {
        let mut conn = self.manager.clone();

        // The cursor borrows the connection, so finish scanning before deleting.
        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<'_, String> = conn
                .scan_match(pattern)
                .await
                .map_err(|e| AppError::Cache(CacheError::from(e)))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut deleted = 0u64;
        for batch in keys.chunks(DELETE_BATCH) {
            let removed: u64 = conn
                .del(batch)
                .await
                .map_err(|e| AppError::Cache(CacheError::from(e)))?;
            deleted += removed;
        }

        debug!(pattern = %pattern, scanned = keys.len(), deleted = deleted, "Deleted cache keys");
        Ok(deleted)
    }
}
