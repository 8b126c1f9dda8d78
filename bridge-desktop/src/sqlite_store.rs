//! State Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::StateStore,
};
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_records (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed state store implementation
///
/// Provides persistent key-value storage using SQLite:
/// - One row per record
/// - Upserts are atomic per key
/// - Async operations
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Create a new state store with the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        // Convert path to string, replacing backslashes with forward slashes for SQLite URL
        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;

        debug!(path = ?db_path, "Initialized state store");

        Ok(Self { pool })
    }

    /// Create an in-memory state store (for testing)
    ///
    /// Every pooled connection to `sqlite::memory:` would open its own
    /// database, so the pool is pinned to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;

        Ok(Self { pool })
    }

    async fn create_table(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to create table: {}", e)))?;
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to get record: {}", e)))?;

        Ok(row.map(|row| row.get(0)))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_records (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to store record: {}", e)))?;

        debug!(key = key, bytes = value.len(), "Stored state record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to delete record: {}", e)))?;

        debug!(key = key, "Deleted state record");
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT key FROM sync_records WHERE substr(key, 1, ?) = ? ORDER BY key",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to list keys: {}", e)))?;

        let keys = rows.into_iter().map(|row| row.get(0)).collect();
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM sync_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to check key: {}", e)))?;

        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_operations() {
        let store = SqliteStateStore::in_memory().await.unwrap();

        store.put("sync-state/7", "{}").await.unwrap();
        assert_eq!(store.get("sync-state/7").await.unwrap(), Some("{}".to_string()));
        assert!(store.contains("sync-state/7").await.unwrap());

        store.put("sync-state/7", r#"{"enabled":true}"#).await.unwrap();
        assert_eq!(
            store.get("sync-state/7").await.unwrap(),
            Some(r#"{"enabled":true}"#.to_string())
        );

        store.delete("sync-state/7").await.unwrap();
        assert_eq!(store.get("sync-state/7").await.unwrap(), None);
        assert!(!store.contains("sync-state/7").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let store = SqliteStateStore::in_memory().await.unwrap();

        store.put("sync-state/2", "{}").await.unwrap();
        store.put("sync-state/1", "{}").await.unwrap();
        store.put("sync-events/1", "{}").await.unwrap();

        let keys = store.list_keys("sync-state/").await.unwrap();
        assert_eq!(keys, vec!["sync-state/1", "sync-state/2"]);

        // LIKE wildcards in the prefix are matched literally
        assert!(store.list_keys("sync_state/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.db");

        {
            let store = SqliteStateStore::new(path.clone()).await.unwrap();
            store.put("sync-state/1", "{}").await.unwrap();
        }

        let reopened = SqliteStateStore::new(path).await.unwrap();
        assert_eq!(reopened.get("sync-state/1").await.unwrap(), Some("{}".to_string()));
    }
}
