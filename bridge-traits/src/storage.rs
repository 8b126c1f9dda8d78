//! Durable State Storage Abstraction
//!
//! Provides a platform-agnostic key-value contract for the engine's durable
//! per-user records (sync state, tracked items, event log, broken albums).

use async_trait::async_trait;

use crate::error::Result;

/// Key-value state storage trait
///
/// Values are opaque UTF-8 documents (the engine writes JSON). Keys are
/// namespaced with a `/` separated prefix so that all records of one kind can
/// be enumerated with [`list_keys`](StateStore::list_keys):
/// - Desktop: one JSON file per record, or an embedded SQLite table
/// - Tests: in-memory SQLite
///
/// Implementations must make a single `put` atomic with respect to concurrent
/// readers of the same key: a reader observes either the old or the new
/// document, never a partial write.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::StateStore;
///
/// async fn remember(store: &dyn StateStore) -> Result<()> {
///     store.put("sync-state/42", r#"{"enabled":true}"#).await?;
///     let keys = store.list_keys("sync-state/").await?;
///     assert_eq!(keys, vec!["sync-state/42".to_string()]);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Retrieve a document
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a document, replacing any previous value
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a document. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every key starting with `prefix`, in ascending order
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check if a document exists without retrieving it
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
