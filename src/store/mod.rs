/// Key-value cache storage
///
/// Backend seam for the caching layer. Entries are timestamped JSON values;
/// `data: None` is a valid negative entry recording a 404. Concurrent
/// writers racing on one key are tolerated (last writer wins); the caching
/// layer itself guarantees a single network writer per key.

pub mod memory;
pub mod redis;
pub mod sqlite;

pub use memory::MemoryStore;
pub use self::redis::{RedisStore, RedisStoreConfig};
pub use sqlite::SqliteStore;

use crate::error::ClientResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single timestamped cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Cached value; `None` records that the resource did not exist
    pub data: Option<Value>,

    /// When the entry was written
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    /// Create an entry stamped now
    pub fn new(data: Option<Value>) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }

    /// Age of this entry relative to now
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }

    /// Whether this is a negative (404) entry
    pub fn is_negative(&self) -> bool {
        self.data.is_none()
    }
}

/// Cache storage backend trait
///
/// Implementations handle the actual storage and retrieval of entries.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Look up an entry by key
    async fn get(&self, key: &str) -> ClientResult<Option<Entry>>;

    /// Overwrite the entry for a key, stamping it with the current time
    async fn set(&self, key: &str, data: Option<Value>) -> ClientResult<()>;

    /// Remove the entry for a key
    async fn invalidate(&self, key: &str) -> ClientResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_entry_negative() {
        let entry = Entry::new(None);
        assert!(entry.is_negative());
        let entry = Entry::new(Some(serde_json::json!({"v": 1})));
        assert!(!entry.is_negative());
    }

    #[test]
    fn test_entry_age() {
        let mut entry = Entry::new(None);
        entry.timestamp = Utc::now() - Duration::seconds(10);
        assert!(entry.age() >= Duration::seconds(10));
        assert!(entry.age() < Duration::seconds(11));
    }
}
