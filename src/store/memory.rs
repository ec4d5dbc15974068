/// In-memory cache backend
use super::{Entry, KvStore};
use crate::error::ClientResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local map backend; the default store for short-lived clients
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Overwrite an entry with an explicit timestamp
    ///
    /// Test hook for aging entries without sleeping.
    pub async fn set_raw(&self, key: &str, entry: Entry) {
        self.entries.write().await.insert(key.to_string(), entry);
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> ClientResult<Option<Entry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, data: Option<Value>) -> ClientResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry::new(data));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> ClientResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
