//! State Storage using one JSON file per record

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::StateStore,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// Distinguishes temporary files of concurrent writers in one process
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// File-backed state store
///
/// Each key `namespace/name` maps to `<root>/namespace/name.json`. Writes go to
/// a sibling temporary file that is renamed over the target, so readers never
/// observe a partially written document.
pub struct JsonFileStateStore {
    root: PathBuf,
}

impl JsonFileStateStore {
    /// Create a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn validate_segment(segment: &str, key: &str) -> Result<()> {
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains('\\')
            || segment.contains('\0')
        {
            return Err(BridgeError::OperationFailed(format!(
                "Invalid state key: {:?}",
                key
            )));
        }
        Ok(())
    }

    /// The suffix is appended, never substituted, so dotted names stay distinct
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        let mut segments = key.split('/').peekable();
        while let Some(segment) = segments.next() {
            Self::validate_segment(segment, key)?;
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{}.json", segment));
            }
        }
        Ok(path)
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(Self::map_io_error)?;
        }

        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = path.clone().into_os_string();
        tmp_name.push(format!(".{}-{}.tmp", std::process::id(), seq));
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, value.as_bytes())
            .await
            .map_err(Self::map_io_error)?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(Self::map_io_error)?;

        debug!(key = key, bytes = value.len(), "Stored state record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = key, "Deleted state record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        // Split "a/b/na" into the directory "a/b" and the name prefix "na"
        let (dir_key, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };

        let mut dir = self.root.clone();
        if !dir_key.is_empty() {
            for segment in dir_key.split('/') {
                Self::validate_segment(segment, prefix)?;
                dir.push(segment);
            }
        }

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::map_io_error(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Self::map_io_error)? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(".json") else {
                continue;
            };
            if !name.starts_with(name_prefix) {
                continue;
            }
            if dir_key.is_empty() {
                keys.push(name.to_string());
            } else {
                keys.push(format!("{}/{}", dir_key, name));
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path());

        assert_eq!(store.get("sync-state/1").await.unwrap(), None);
        assert!(!store.contains("sync-state/1").await.unwrap());
        assert!(store.list_keys("sync-state/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path());

        store.put("sync-state/1", r#"{"enabled":true}"#).await.unwrap();
        assert_eq!(
            store.get("sync-state/1").await.unwrap(),
            Some(r#"{"enabled":true}"#.to_string())
        );
        assert!(dir.path().join("sync-state").join("1.json").exists());

        store.put("sync-state/1", r#"{"enabled":false}"#).await.unwrap();
        assert_eq!(
            store.get("sync-state/1").await.unwrap(),
            Some(r#"{"enabled":false}"#.to_string())
        );

        store.delete("sync-state/1").await.unwrap();
        assert_eq!(store.get("sync-state/1").await.unwrap(), None);
        store.delete("sync-state/1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path());

        store.put("sync-state/20", "{}").await.unwrap();
        store.put("sync-state/10", "{}").await.unwrap();
        store.put("sync-tracked/10", "{}").await.unwrap();

        assert_eq!(
            store.list_keys("sync-state/").await.unwrap(),
            vec!["sync-state/10".to_string(), "sync-state/20".to_string()]
        );
        assert_eq!(
            store.list_keys("sync-state/2").await.unwrap(),
            vec!["sync-state/20".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dotted_names_are_distinct_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path());

        store.put("sync-state/john.doe", "A").await.unwrap();
        store.put("sync-state/john.smith", "B").await.unwrap();

        assert_eq!(
            store.get("sync-state/john.doe").await.unwrap(),
            Some("A".to_string())
        );
        assert_eq!(
            store.get("sync-state/john.smith").await.unwrap(),
            Some("B".to_string())
        );
        assert_eq!(store.get("sync-state/john").await.unwrap(), None);
        assert!(dir.path().join("sync-state").join("john.doe.json").exists());
        assert_eq!(
            store.list_keys("sync-state/").await.unwrap(),
            vec![
                "sync-state/john.doe".to_string(),
                "sync-state/john.smith".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path());

        assert!(store.put("../escape", "{}").await.is_err());
        assert!(store.get("sync-state//x").await.is_err());
    }
}
