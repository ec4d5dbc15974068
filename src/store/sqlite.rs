/// SQLite-backed cache backend
///
/// Persists entries across client restarts. Timestamps are stored as
/// RFC3339 TEXT; values as their JSON text, NULL for negative entries.
use super::{Entry, KvStore};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// Persistent cache backend over a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open a store over an existing pool, creating the table if needed
    pub async fn new(db: SqlitePool) -> ClientResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entry (
                key TEXT PRIMARY KEY,
                data TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await
        .map_err(|e| ClientError::Store(format!("failed to create kv_entry table: {}", e)))?;

        Ok(Self { db })
    }

    /// Open a store at the given SQLite URL
    pub async fn connect(url: &str) -> ClientResult<Self> {
        let db = SqlitePool::connect(url)
            .await
            .map_err(|e| ClientError::Store(format!("failed to open database: {}", e)))?;
        Self::new(db).await
    }

    /// Delete every entry older than the given cutoff
    pub async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> ClientResult<u64> {
        let result = sqlx::query("DELETE FROM kv_entry WHERE timestamp < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(&self.db)
            .await
            .map_err(|e| ClientError::Store(format!("cleanup failed: {}", e)))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> ClientResult<Option<Entry>> {
        let row = sqlx::query("SELECT data, timestamp FROM kv_entry WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| ClientError::Store(format!("get failed: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: Option<String> = row
            .try_get("data")
            .map_err(|e| ClientError::Store(format!("bad data column: {}", e)))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(|e| ClientError::Store(format!("bad timestamp column: {}", e)))?;

        let data = match data {
            Some(text) => Some(
                serde_json::from_str(&text)
                    .map_err(|e| ClientError::Store(format!("corrupt cached value: {}", e)))?,
            ),
            None => None,
        };

        Ok(Some(Entry {
            data,
            timestamp: parse_timestamp(&timestamp)?,
        }))
    }

    async fn set(&self, key: &str, data: Option<Value>) -> ClientResult<()> {
        let text = match &data {
            Some(value) => Some(
                serde_json::to_string(value)
                    .map_err(|e| ClientError::Store(format!("value not serializable: {}", e)))?,
            ),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO kv_entry (key, data, timestamp)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(key)
        .bind(text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await
        .map_err(|e| ClientError::Store(format!("set failed: {}", e)))?;

        Ok(())
    }

    async fn invalidate(&self, key: &str) -> ClientResult<()> {
        sqlx::query("DELETE FROM kv_entry WHERE key = ?1")
            .bind(key)
            .execute(&self.db)
            .await
            .map_err(|e| ClientError::Store(format!("invalidate failed: {}", e)))?;

        Ok(())
    }
}

/// Parse RFC3339 timestamp
fn parse_timestamp(s: &str) -> ClientResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ClientError::Store(format!("invalid timestamp: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = create_test_store().await;

        store
            .set("entity:con1test", Some(json!({"domain": "a.example"})))
            .await
            .unwrap();

        let entry = store.get("entity:con1test").await.unwrap().unwrap();
        assert_eq!(entry.data, Some(json!({"domain": "a.example"})));
    }

    #[tokio::test]
    async fn test_negative_entry_roundtrip() {
        let store = create_test_store().await;

        store.set("message:gone", None).await.unwrap();

        let entry = store.get("message:gone").await.unwrap().unwrap();
        assert!(entry.is_negative());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = create_test_store().await;

        store.set("k", Some(json!(1))).await.unwrap();
        store.set("k", Some(json!(2))).await.unwrap();

        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.data, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let store = create_test_store().await;

        store.set("k", Some(json!(1))).await.unwrap();
        store.invalidate("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_older_than() {
        let store = create_test_store().await;

        store.set("old", Some(json!(1))).await.unwrap();
        let deleted = store
            .cleanup_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("old").await.unwrap().is_none());
    }
}
