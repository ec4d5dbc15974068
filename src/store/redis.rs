/// Redis-backed cache backend
///
/// Lets several clients on one machine share a cache. Entries are stored
/// as JSON under a configurable key prefix; a corrupt entry is deleted and
/// treated as a miss rather than surfaced.
use super::{Entry, KvStore};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tracing::{debug, warn};

/// Redis store configuration
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Key prefix for all entries (default: "concrnt:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "concrnt:".to_string(),
        }
    }
}

/// Shared cache backend over Redis
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl RedisStore {
    /// Connect to Redis with the given configuration
    pub async fn new(config: RedisStoreConfig) -> ClientResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| ClientError::Store(format!("redis client creation failed: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| ClientError::Store(format!("redis connection failed: {}", e)))?;

        Ok(Self { connection, config })
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> ClientResult<Option<Entry>> {
        let redis_key = self.build_key(key);

        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(&redis_key)
            .await
            .map_err(|e| ClientError::Store(format!("redis GET failed: {}", e)))?;

        let Some(json) = raw else {
            debug!("cache miss: {}", redis_key);
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("deleting corrupt cache entry {}: {}", redis_key, e);
                let _: Result<(), _> = conn.del(&redis_key).await;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, data: Option<Value>) -> ClientResult<()> {
        let redis_key = self.build_key(key);
        let json = serde_json::to_string(&Entry::new(data))
            .map_err(|e| ClientError::Store(format!("entry not serializable: {}", e)))?;

        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(&redis_key, json)
            .await
            .map_err(|e| ClientError::Store(format!("redis SET failed: {}", e)))?;

        Ok(())
    }

    async fn invalidate(&self, key: &str) -> ClientResult<()> {
        let redis_key = self.build_key(key);

        let mut conn = self.connection.clone();
        conn.del::<_, ()>(&redis_key)
            .await
            .map_err(|e| ClientError::Store(format!("redis DEL failed: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.key_prefix, "concrnt:");
    }

    #[test]
    fn test_build_key() {
        // Key building is pure; exercising get/set needs a live Redis
        let config = RedisStoreConfig::default();
        let key = format!("{}{}", config.key_prefix, "message:m1");
        assert_eq!(key, "concrnt:message:m1");
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = Entry::new(Some(serde_json::json!({"v": 1})));
        let json = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, entry.data);
    }
}
